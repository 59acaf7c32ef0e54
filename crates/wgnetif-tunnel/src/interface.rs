// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registration of the tunnel interface and its single peer.
//!
//! [`InterfaceManager`] holds at most one [`TunnelInterfaceHandle`]. The peer
//! lives inside the interface handle, so a peer can never outlive the
//! interface it was added to.

use crate::config::TunnelConfig;
use crate::error::{CreationError, PeerError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info, instrument, warn};
use wgnetif_common::{
	InterfaceDescriptor, InterfaceInit, NetStack, NetifId, PeerDescriptor, PeerIndex, WgPublicKey,
	WireGuard,
};

pub const INTERFACE_NAME: &str = "wg";

/// The peer attached to the tunnel interface.
#[derive(Debug, PartialEq, Eq)]
pub struct PeerHandle {
	index: PeerIndex,
	public_key: WgPublicKey,
	endpoint: Option<SocketAddr>,
}

impl PeerHandle {
	pub fn index(&self) -> PeerIndex {
		self.index
	}

	pub fn public_key(&self) -> &WgPublicKey {
		&self.public_key
	}

	/// `None` when the resolved endpoint was unspecified.
	pub fn endpoint(&self) -> Option<SocketAddr> {
		self.endpoint
	}
}

/// Ownership of the registered tunnel interface. Not `Clone`: there is one per manager.
#[derive(Debug, PartialEq, Eq)]
pub struct TunnelInterfaceHandle {
	netif: NetifId,
	local_address: Ipv4Addr,
	peer: Option<PeerHandle>,
}

impl TunnelInterfaceHandle {
	pub fn netif(&self) -> NetifId {
		self.netif
	}

	pub fn local_address(&self) -> Ipv4Addr {
		self.local_address
	}

	pub fn peer(&self) -> Option<&PeerHandle> {
		self.peer.as_ref()
	}
}

#[derive(Debug, Default)]
pub struct InterfaceManager {
	interface: Option<TunnelInterfaceHandle>,
}

impl InterfaceManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn handle(&self) -> Option<&TunnelInterfaceHandle> {
		self.interface.as_ref()
	}

	pub fn is_active(&self) -> bool {
		self.interface.is_some()
	}

	pub fn peer(&self) -> Option<&PeerHandle> {
		self.interface.as_ref().and_then(|h| h.peer.as_ref())
	}

	/// Registers the tunnel interface and marks it administratively up.
	///
	/// On failure nothing stays registered.
	#[instrument(skip_all, fields(local = %config.local_address, netmask = %config.subnet_mask))]
	pub fn create_interface<S, W>(
		&mut self,
		stack: &mut S,
		wireguard: &mut W,
		config: &TunnelConfig,
	) -> Result<&TunnelInterfaceHandle, CreationError>
	where
		S: NetStack,
		W: WireGuard,
	{
		if let Some(existing) = &self.interface {
			warn!(netif = %existing.netif, "tunnel interface already active");
			return Err(CreationError::AlreadyActive);
		}

		let descriptor = InterfaceDescriptor::new(
			INTERFACE_NAME,
			config.local_address,
			config.subnet_mask,
			config.gateway,
		);
		let netif = stack.add_interface(&descriptor).map_err(CreationError::Rejected)?;

		let init = InterfaceInit {
			private_key: config.private_key.clone(),
			listen_port: config.listen_port,
		};
		if let Err(e) = wireguard.init_interface(netif, &init) {
			stack.remove_interface(netif);
			return Err(CreationError::Driver(e));
		}

		stack.set_up(netif);
		info!(%netif, "registered tunnel interface");

		Ok(self.interface.insert(TunnelInterfaceHandle {
			netif,
			local_address: config.local_address,
			peer: None,
		}))
	}

	/// Attaches the full-tunnel peer and, when the endpoint is known, starts connecting.
	///
	/// An unspecified `endpoint_ip` means the endpoint is unknown: the peer is
	/// added without one and no connection is attempted.
	#[instrument(skip(self, wireguard, public_key), fields(peer = %public_key))]
	pub fn add_peer<W: WireGuard>(
		&mut self,
		wireguard: &mut W,
		public_key: WgPublicKey,
		endpoint_ip: IpAddr,
		port: u16,
	) -> Result<&PeerHandle, PeerError> {
		let handle = self.interface.as_mut().ok_or(PeerError::NoInterface)?;
		if handle.peer.is_some() {
			return Err(PeerError::AlreadyAttached);
		}

		wireguard.platform_init();

		let endpoint = (!endpoint_ip.is_unspecified()).then(|| SocketAddr::new(endpoint_ip, port));
		let mut descriptor = PeerDescriptor::new(public_key);
		if let Some(endpoint) = endpoint {
			descriptor = descriptor.with_endpoint(endpoint);
		}

		let index = wireguard.add_peer(handle.netif, &descriptor);
		if !index.is_valid() {
			return Err(PeerError::Rejected { public_key });
		}
		debug!(%index, allowed = %descriptor.allowed, "peer added");

		if let Some(endpoint) = endpoint {
			info!(%endpoint, "connecting wireguard");
			if let Err(e) = wireguard.connect(handle.netif, index) {
				warn!(%endpoint, error = %e, "failed to start connection to peer");
			}
		}

		Ok(handle.peer.insert(PeerHandle {
			index,
			public_key,
			endpoint,
		}))
	}

	/// Tears down the peer and the interface. A no-op when nothing is registered.
	///
	/// Order: disconnect, remove peer, shut down the driver, unregister.
	#[instrument(skip_all)]
	pub fn remove_interface<S, W>(&mut self, stack: &mut S, wireguard: &mut W)
	where
		S: NetStack,
		W: WireGuard,
	{
		let Some(handle) = self.interface.take() else {
			debug!("no tunnel interface to remove");
			return;
		};
		let netif = handle.netif;

		if let Some(peer) = handle.peer {
			wireguard.disconnect(netif, peer.index);
			wireguard.remove_peer(netif, peer.index);
			debug!(%netif, peer = %peer.index, "peer removed");
		}
		wireguard.shutdown(netif);
		stack.set_down(netif);
		stack.remove_interface(netif);
		info!(%netif, "removed tunnel interface");
	}
}
