// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Contract with the WireGuard protocol implementation that drives a tunnel interface.

use crate::ip::full_tunnel;
use crate::keys::{WgPrivateKey, WgPublicKey, REDACTED};
use crate::netstack::NetifId;
use ipnet::Ipv4Net;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Slot in an interface's peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIndex(u8);

impl PeerIndex {
	/// Returned by [`WireGuard::add_peer`] when the peer could not be added.
	pub const INVALID: PeerIndex = PeerIndex(u8::MAX);

	pub const fn new(index: u8) -> Self {
		Self(index)
	}

	pub fn is_valid(self) -> bool {
		self != Self::INVALID
	}

	pub fn get(self) -> u8 {
		self.0
	}
}

impl fmt::Display for PeerIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_valid() {
			write!(f, "{}", self.0)
		} else {
			f.write_str("invalid")
		}
	}
}

/// Driver state handed over when the host stack registers a tunnel interface.
#[derive(Debug, Clone)]
pub struct InterfaceInit {
	pub private_key: WgPrivateKey,
	pub listen_port: u16,
}

#[derive(Clone)]
pub struct PeerDescriptor {
	pub public_key: WgPublicKey,
	pub preshared_key: Option<[u8; 32]>,
	pub allowed: Ipv4Net,
	pub endpoint: Option<SocketAddr>,
	pub persistent_keepalive: Option<u16>,
}

impl PeerDescriptor {
	/// A peer that may route every destination, with no endpoint yet.
	pub fn new(public_key: WgPublicKey) -> Self {
		Self {
			public_key,
			preshared_key: None,
			allowed: full_tunnel(),
			endpoint: None,
			persistent_keepalive: None,
		}
	}

	pub fn with_allowed(mut self, allowed: Ipv4Net) -> Self {
		self.allowed = allowed;
		self
	}

	pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
		self.endpoint = Some(endpoint);
		self
	}

	pub fn with_preshared_key(mut self, key: [u8; 32]) -> Self {
		self.preshared_key = Some(key);
		self
	}

	pub fn with_persistent_keepalive(mut self, seconds: u16) -> Self {
		self.persistent_keepalive = Some(seconds);
		self
	}
}

impl fmt::Debug for PeerDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PeerDescriptor")
			.field("public_key", &self.public_key)
			.field("preshared_key", &self.preshared_key.map(|_| REDACTED))
			.field("allowed", &self.allowed)
			.field("endpoint", &self.endpoint)
			.field("persistent_keepalive", &self.persistent_keepalive)
			.finish()
	}
}

#[derive(Debug, Error)]
pub enum WireGuardError {
	#[error("unknown interface {0}")]
	UnknownInterface(NetifId),

	#[error("interface {0} already initialised")]
	AlreadyInitialised(NetifId),

	#[error("invalid peer index {0}")]
	InvalidPeer(PeerIndex),

	#[error("peer {0} has no endpoint")]
	NoEndpoint(PeerIndex),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Driver(String),
}

/// Peer-table and session signalling operations of a WireGuard implementation.
///
/// `connect` is fire-and-forget: it starts the handshake and returns. Session
/// maintenance (timers, rekeying, keepalives) belongs to the implementation.
pub trait WireGuard {
	/// One-time platform setup. Must be idempotent.
	fn platform_init(&mut self);

	fn init_interface(&mut self, netif: NetifId, init: &InterfaceInit) -> Result<(), WireGuardError>;

	/// Returns [`PeerIndex::INVALID`] if the peer was not added.
	fn add_peer(&mut self, netif: NetifId, peer: &PeerDescriptor) -> PeerIndex;

	fn connect(&mut self, netif: NetifId, peer: PeerIndex) -> Result<(), WireGuardError>;

	fn disconnect(&mut self, netif: NetifId, peer: PeerIndex);

	fn remove_peer(&mut self, netif: NetifId, peer: PeerIndex);

	fn shutdown(&mut self, netif: NetifId);
}
