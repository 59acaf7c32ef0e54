// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use wgnetif_common::{NetifId, PeerIndex, WireGuardError};

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("unknown interface {0}")]
	UnknownInterface(NetifId),

	#[error("interface {0} already initialised")]
	AlreadyInitialised(NetifId),

	#[error("invalid peer index {0}")]
	InvalidPeer(PeerIndex),

	#[error("peer {0} has no endpoint")]
	NoEndpoint(PeerIndex),

	#[error("endpoint {0} is not reachable over the IPv4 socket")]
	UnsupportedEndpoint(SocketAddr),

	#[error("no peer routes {0}")]
	NoRoute(Ipv4Addr),

	#[error("not an IPv4 packet")]
	NotIpv4,

	#[error("no tokio runtime available")]
	NoRuntime,

	#[error("WireGuard error: {0}")]
	WireGuard(String),
}

impl From<EngineError> for WireGuardError {
	fn from(err: EngineError) -> Self {
		match err {
			EngineError::Io(e) => WireGuardError::Io(e),
			EngineError::UnknownInterface(netif) => WireGuardError::UnknownInterface(netif),
			EngineError::AlreadyInitialised(netif) => WireGuardError::AlreadyInitialised(netif),
			EngineError::InvalidPeer(peer) => WireGuardError::InvalidPeer(peer),
			EngineError::NoEndpoint(peer) => WireGuardError::NoEndpoint(peer),
			other => WireGuardError::Driver(other.to_string()),
		}
	}
}

pub type Result<T> = std::result::Result<T, EngineError>;
