// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The caller-facing tunnel: `begin`, `end` and `is_initialized`.

use crate::config::{ResolverConfig, TunnelConfig};
use crate::error::{CreationError, Result};
use crate::interface::InterfaceManager;
use crate::resolver::{EndpointResolver, Resolve};
use crate::route::DefaultRouteController;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{debug, error, info, instrument, warn};
use wgnetif_common::{NetStack, NetifId, PeerIndex, WireGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
	Inactive,
	/// Interface registered, but no connected peer promoted to the default route.
	InterfaceOnly,
	Active,
}

impl fmt::Display for TunnelState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TunnelState::Inactive => f.write_str("inactive"),
			TunnelState::InterfaceOnly => f.write_str("interface-only"),
			TunnelState::Active => f.write_str("active"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
	pub state: TunnelState,
	pub netif: Option<NetifId>,
	pub local_address: Option<Ipv4Addr>,
	pub peer: Option<PeerIndex>,
	pub endpoint: Option<SocketAddr>,
	pub default_route_promoted: bool,
}

/// A single WireGuard tunnel interface over a host stack `S`, a protocol
/// implementation `W` and a name resolver `R`.
///
/// Calls must be serialised by the owner; nothing here locks.
pub struct WireGuardTunnel<S, W, R> {
	stack: S,
	wireguard: W,
	resolver: EndpointResolver<R>,
	interfaces: InterfaceManager,
	routes: DefaultRouteController,
}

impl<S, W, R> WireGuardTunnel<S, W, R>
where
	S: NetStack,
	W: WireGuard,
	R: Resolve,
{
	pub fn new(stack: S, wireguard: W, resolver: R) -> Self {
		Self {
			stack,
			wireguard,
			resolver: EndpointResolver::new(resolver),
			interfaces: InterfaceManager::new(),
			routes: DefaultRouteController::new(),
		}
	}

	pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
		self.resolver.set_config(config);
		self
	}

	/// Brings the tunnel up: resolve the peer, register the interface, attach
	/// the peer, and promote the interface to the default route.
	///
	/// On error nothing is left registered and the default route is untouched.
	/// If the peer address resolves to the unspecified address the tunnel comes
	/// up in [`TunnelState::InterfaceOnly`] and the default route is left alone.
	#[instrument(skip(self, config), fields(local = %config.local_address, peer = %config.peer_address, port = config.peer_port))]
	pub async fn begin(&mut self, config: &TunnelConfig) -> Result<()> {
		if self.interfaces.is_active() {
			error!("tunnel already initialised");
			return Err(CreationError::AlreadyActive.into());
		}

		let endpoint = match self.resolver.resolve(&config.peer_address).await {
			Ok(endpoint) => endpoint,
			Err(e) => {
				error!(error = %e, "failed to get endpoint ip");
				return Err(e.into());
			}
		};

		let netif = match self
			.interfaces
			.create_interface(&mut self.stack, &mut self.wireguard, config)
		{
			Ok(handle) => handle.netif(),
			Err(e) => {
				error!(error = %e, "failed to initialize WG netif");
				return Err(e.into());
			}
		};

		let endpoint_known = match self.interfaces.add_peer(
			&mut self.wireguard,
			config.peer_public_key,
			endpoint,
			config.peer_port,
		) {
			Ok(peer) => peer.endpoint().is_some(),
			Err(e) => {
				error!(error = %e, "failed to add peer; releasing interface");
				self.interfaces.remove_interface(&mut self.stack, &mut self.wireguard);
				return Err(e.into());
			}
		};

		if endpoint_known {
			self.routes.promote(&mut self.stack, netif);
		} else {
			warn!(%endpoint, "peer endpoint unspecified; default route unchanged");
		}

		info!(%netif, state = %self.state(), "tunnel up");
		Ok(())
	}

	/// Restores the default route, then removes the peer and the interface.
	/// Safe to call at any time.
	#[instrument(skip(self))]
	pub fn end(&mut self) {
		if !self.is_initialized() {
			debug!("tunnel not initialised; nothing to tear down");
			return;
		}
		self.routes.restore(&mut self.stack);
		self.interfaces.remove_interface(&mut self.stack, &mut self.wireguard);
		info!("tunnel down");
	}

	/// Whether an interface is registered, regardless of handshake progress.
	pub fn is_initialized(&self) -> bool {
		self.interfaces.is_active()
	}

	pub fn state(&self) -> TunnelState {
		match self.interfaces.peer() {
			_ if !self.interfaces.is_active() => TunnelState::Inactive,
			Some(peer) if peer.endpoint().is_some() && self.routes.is_promoted() => TunnelState::Active,
			_ => TunnelState::InterfaceOnly,
		}
	}

	pub fn status(&self) -> TunnelStatus {
		let handle = self.interfaces.handle();
		let peer = self.interfaces.peer();
		TunnelStatus {
			state: self.state(),
			netif: handle.map(|h| h.netif()),
			local_address: handle.map(|h| h.local_address()),
			peer: peer.map(|p| p.index()),
			endpoint: peer.and_then(|p| p.endpoint()),
			default_route_promoted: self.routes.is_promoted(),
		}
	}

	pub fn stack(&self) -> &S {
		&self.stack
	}

	pub fn wireguard(&self) -> &W {
		&self.wireguard
	}

	pub fn resolver(&self) -> &EndpointResolver<R> {
		&self.resolver
	}
}

impl<S, W, R> fmt::Debug for WireGuardTunnel<S, W, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WireGuardTunnel")
			.field("interface", &self.interfaces.handle())
			.field("previous_default", &self.routes.previous())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{PeerError, ResolutionError, TunnelError};
	use crate::memory_stack::MemoryNetStack;
	use crate::testing::{config, CallLog, FakeWireGuard, RecordingStack, ScriptedResolver};
	use std::net::IpAddr;
	use wgnetif_common::{InterfaceDescriptor, HOST_ONLY_MASK, NO_GATEWAY};

	type TestTunnel = WireGuardTunnel<RecordingStack, FakeWireGuard, ScriptedResolver>;

	struct Harness {
		log: CallLog,
		stack: MemoryNetStack,
		uplink: NetifId,
	}

	impl Harness {
		/// A stack with an `eth` uplink as the default route.
		fn new() -> Self {
			let mut stack = MemoryNetStack::new();
			let descriptor = InterfaceDescriptor::new(
				"eth",
				Ipv4Addr::new(192, 168, 1, 20),
				Ipv4Addr::new(255, 255, 255, 0),
				Ipv4Addr::new(192, 168, 1, 1),
			);
			let uplink = stack.add_interface(&descriptor).unwrap();
			stack.set_default_interface(Some(uplink));
			Self {
				log: CallLog::new(),
				stack,
				uplink,
			}
		}

		fn tunnel(&self, wg: FakeWireGuard, resolver: ScriptedResolver) -> TestTunnel {
			WireGuardTunnel::new(
				RecordingStack::new(self.stack.clone(), self.log.clone()),
				wg,
				resolver.with_log(self.log.clone()),
			)
		}

		fn wg(&self) -> FakeWireGuard {
			FakeWireGuard::new(self.log.clone())
		}
	}

	fn resolving_to(ip: [u8; 4]) -> ScriptedResolver {
		ScriptedResolver::always(vec![IpAddr::V4(Ipv4Addr::from(ip))])
	}

	#[tokio::test]
	async fn test_begin_establishes_tunnel() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));
		let cfg = config();

		tunnel.begin(&cfg).await.unwrap();

		assert!(tunnel.is_initialized());
		let status = tunnel.status();
		assert_eq!(status.state, TunnelState::Active);
		assert_eq!(status.local_address, Some(Ipv4Addr::new(10, 0, 0, 2)));
		assert_eq!(status.endpoint, Some("203.0.113.5:51820".parse().unwrap()));
		assert!(status.peer.is_some_and(PeerIndex::is_valid));

		let netif = status.netif.unwrap();
		assert_eq!(h.stack.default_interface(), Some(netif));
		let info = h.stack.interface(netif).unwrap();
		assert_eq!(info.descriptor.address, Ipv4Addr::new(10, 0, 0, 2));
		assert!(info.up);

		let peer = tunnel.wireguard().last_peer().unwrap();
		assert_eq!(peer.allowed.to_string(), "0.0.0.0/0");
		assert_eq!(peer.endpoint, Some("203.0.113.5:51820".parse().unwrap()));
		assert_eq!(
			h.log.calls(),
			vec![
				"resolver.lookup",
				"stack.add_interface",
				"wg.init_interface",
				"stack.set_up",
				"wg.platform_init",
				"wg.add_peer",
				"wg.connect",
				"stack.default_interface",
				"stack.set_default_interface",
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_resolution_failure_leaves_no_state() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), ScriptedResolver::failing());

		let err = tunnel.begin(&config()).await.unwrap_err();

		assert!(matches!(
			err,
			TunnelError::Resolution(ResolutionError::Exhausted { attempts: 5, .. })
		));
		assert_eq!(tunnel.resolver().backend().calls(), 5);
		assert!(!tunnel.is_initialized());
		assert_eq!(tunnel.state(), TunnelState::Inactive);
		assert_eq!(h.stack.interface_count(), 1);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
		assert!(h.log.calls().iter().all(|c| c == "resolver.lookup"));
	}

	#[tokio::test]
	async fn test_creation_failure_skips_peer() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg().failing_init(), resolving_to([203, 0, 113, 5]));

		let err = tunnel.begin(&config()).await.unwrap_err();

		assert!(matches!(err, TunnelError::Creation(CreationError::Driver(_))));
		assert!(!tunnel.is_initialized());
		assert_eq!(h.log.position("wg.add_peer"), None);
		assert_eq!(h.stack.interface_count(), 1);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
	}

	#[tokio::test]
	async fn test_peer_failure_releases_interface() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg().rejecting_peers(), resolving_to([203, 0, 113, 5]));

		let err = tunnel.begin(&config()).await.unwrap_err();

		assert!(matches!(err, TunnelError::Peer(PeerError::Rejected { .. })));
		assert!(!tunnel.is_initialized());
		assert_eq!(h.stack.interface_count(), 1);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
		assert_eq!(h.log.position("stack.set_default_interface"), None);
		assert!(h.log.position("stack.remove_interface").is_some());

		// Nothing left for end to do.
		h.log.clear();
		tunnel.end();
		assert!(h.log.calls().is_empty());
	}

	#[tokio::test]
	async fn test_unspecified_endpoint_is_interface_only() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([0, 0, 0, 0]));

		tunnel.begin(&config()).await.unwrap();

		assert!(tunnel.is_initialized());
		assert_eq!(tunnel.state(), TunnelState::InterfaceOnly);
		assert_eq!(tunnel.resolver().backend().calls(), 1);
		assert_eq!(h.log.position("wg.connect"), None);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));

		tunnel.end();
		assert!(!tunnel.is_initialized());
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
		assert_eq!(h.stack.interface_count(), 1);
	}

	#[tokio::test]
	async fn test_connect_failure_does_not_fail_begin() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg().failing_connect(), resolving_to([203, 0, 113, 5]));

		tunnel.begin(&config()).await.unwrap();

		assert_eq!(tunnel.state(), TunnelState::Active);
	}

	#[tokio::test]
	async fn test_end_restores_route_before_removal() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));
		tunnel.begin(&config()).await.unwrap();
		h.log.clear();

		tunnel.end();

		assert_eq!(
			h.log.calls(),
			vec![
				"stack.set_default_interface",
				"wg.disconnect",
				"wg.remove_peer",
				"wg.shutdown",
				"stack.set_down",
				"stack.remove_interface",
			]
		);
		assert!(!tunnel.is_initialized());
		assert_eq!(tunnel.state(), TunnelState::Inactive);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
		assert_eq!(h.stack.interface_count(), 1);
	}

	#[tokio::test]
	async fn test_end_restores_no_default() {
		let log = CallLog::new();
		let stack = MemoryNetStack::new();
		let mut tunnel = WireGuardTunnel::new(
			RecordingStack::new(stack.clone(), log.clone()),
			FakeWireGuard::new(log.clone()),
			resolving_to([203, 0, 113, 5]),
		);
		tunnel.begin(&config()).await.unwrap();
		assert!(stack.default_interface().is_some());

		tunnel.end();

		assert_eq!(stack.default_interface(), None);
	}

	#[tokio::test]
	async fn test_end_twice_is_same_as_once() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));
		tunnel.begin(&config()).await.unwrap();

		tunnel.end();
		let after_first = h.log.calls();
		tunnel.end();

		assert_eq!(h.log.calls(), after_first);
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
	}

	#[tokio::test]
	async fn test_end_without_begin_is_noop() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));

		tunnel.end();

		assert!(h.log.calls().is_empty());
		assert_eq!(h.stack.default_interface(), Some(h.uplink));
	}

	#[tokio::test]
	async fn test_second_begin_fails_fast() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));
		tunnel.begin(&config()).await.unwrap();
		let netif = tunnel.status().netif;
		h.log.clear();

		let err = tunnel.begin(&config()).await.unwrap_err();

		assert!(matches!(err, TunnelError::Creation(CreationError::AlreadyActive)));
		assert!(h.log.calls().is_empty());
		assert_eq!(tunnel.status().netif, netif);
		assert_eq!(tunnel.state(), TunnelState::Active);
	}

	#[tokio::test]
	async fn test_begin_again_after_end() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));

		tunnel.begin(&config()).await.unwrap();
		tunnel.end();
		tunnel.begin(&config()).await.unwrap();

		assert_eq!(tunnel.state(), TunnelState::Active);
	}

	#[tokio::test]
	async fn test_host_only_config() {
		let h = Harness::new();
		let mut tunnel = h.tunnel(h.wg(), resolving_to([203, 0, 113, 5]));
		let base = config();
		let cfg = TunnelConfig::host_only(
			Ipv4Addr::new(10, 0, 0, 2),
			base.private_key.clone(),
			"example.com",
			base.peer_public_key,
			51820,
		)
		.unwrap();

		tunnel.begin(&cfg).await.unwrap();

		let info = h.stack.interface(tunnel.status().netif.unwrap()).unwrap();
		assert_eq!(info.descriptor.netmask, HOST_ONLY_MASK);
		assert_eq!(info.descriptor.gateway, NO_GATEWAY);
	}

	#[tokio::test]
	async fn test_no_free_slot_is_creation_failure() {
		let log = CallLog::new();
		let stack = MemoryNetStack::with_capacity(0);
		let mut tunnel = WireGuardTunnel::new(
			RecordingStack::new(stack.clone(), log.clone()),
			FakeWireGuard::new(log.clone()),
			resolving_to([203, 0, 113, 5]),
		);

		let err = tunnel.begin(&config()).await.unwrap_err();

		assert!(matches!(err, TunnelError::Creation(CreationError::Rejected(_))));
		assert!(!tunnel.is_initialized());
		assert_eq!(log.position("wg.init_interface"), None);
	}
}
