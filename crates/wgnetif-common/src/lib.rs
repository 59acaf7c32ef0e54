// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod ip;
pub mod keys;
pub mod netstack;
pub mod wireguard;

pub use ip::{
	full_tunnel, interface_network, mask_to_prefix, prefix_to_mask, InvalidMask, HOST_ONLY_MASK,
	NO_GATEWAY,
};
pub use keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey, REDACTED};
pub use netstack::{InterfaceDescriptor, NetStack, NetifId, StackError, DEFAULT_MTU};
pub use wireguard::{InterfaceInit, PeerDescriptor, PeerIndex, WireGuard, WireGuardError};
