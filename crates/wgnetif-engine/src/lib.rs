// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod engine;
pub mod error;
pub mod router;

pub use engine::{InboundPacket, PeerStats, WgEngine, WgEngineConfig};
pub use error::{EngineError, Result};
pub use router::AllowedIps;
