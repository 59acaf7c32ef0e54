// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lifecycle orchestration for a single WireGuard tunnel interface.
//!
//! [`WireGuardTunnel::begin`] resolves the peer address, registers the tunnel
//! interface with the host stack, attaches the peer and makes the interface the
//! default route. [`WireGuardTunnel::end`] reverses those steps.

pub mod config;
pub mod error;
pub mod interface;
pub mod memory_stack;
pub mod resolver;
pub mod route;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use config::{ResolverConfig, TunnelConfig};
pub use error::{ConfigError, CreationError, PeerError, ResolutionError, Result, TunnelError};
pub use interface::{InterfaceManager, PeerHandle, TunnelInterfaceHandle, INTERFACE_NAME};
pub use memory_stack::{InterfaceInfo, MemoryNetStack};
pub use resolver::{EndpointResolver, Resolve, StaticResolver, SystemResolver};
pub use route::{DefaultRouteController, PreviousDefaultRoute};
pub use tunnel::{TunnelState, TunnelStatus, WireGuardTunnel};

pub use wgnetif_common::{WgKeyPair, WgPrivateKey, WgPublicKey};
