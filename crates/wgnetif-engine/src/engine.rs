// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Userspace WireGuard implementation of the [`WireGuard`] contract.
//!
//! Each initialised interface owns a UDP socket, a bounded peer table and a
//! cryptokey routing table. The first `connect` on an interface spawns a
//! driver task that runs session timers and decrypts inbound datagrams until
//! the interface is shut down or its last peer is disconnected.

use crate::error::{EngineError, Result};
use crate::router::AllowedIps;
use defguard_boringtun::noise::{Tunn, TunnResult};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};
use wgnetif_common::{
	InterfaceInit, NetifId, PeerDescriptor, PeerIndex, WgPrivateKey, WgPublicKey, WireGuard,
	WireGuardError,
};

const MAX_DATAGRAM: usize = 65536;
const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_millis(250);

/// A decrypted IPv4 packet that passed the allowed-range check.
#[derive(Debug, Clone)]
pub struct InboundPacket {
	pub netif: NetifId,
	pub peer: PeerIndex,
	pub packet: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PeerStats {
	pub public_key: WgPublicKey,
	pub endpoint: Option<SocketAddr>,
	pub connected: bool,
	pub last_handshake: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WgEngineConfig {
	/// Peer table size per interface. Must stay below `u8::MAX`.
	pub max_peers: usize,
	pub timer_interval: Duration,
	pub inbound: Option<mpsc::Sender<InboundPacket>>,
}

impl Default for WgEngineConfig {
	fn default() -> Self {
		Self {
			max_peers: 1,
			timer_interval: DEFAULT_TIMER_INTERVAL,
			inbound: None,
		}
	}
}

impl WgEngineConfig {
	pub fn with_max_peers(mut self, max_peers: usize) -> Self {
		self.max_peers = max_peers.clamp(1, usize::from(u8::MAX) - 1);
		self
	}

	pub fn with_timer_interval(mut self, interval: Duration) -> Self {
		self.timer_interval = interval;
		self
	}

	pub fn with_inbound(mut self, tx: mpsc::Sender<InboundPacket>) -> Self {
		self.inbound = Some(tx);
		self
	}
}

struct PeerSlot {
	public_key: WgPublicKey,
	endpoint: Option<SocketAddr>,
	tunn: Mutex<Tunn>,
	connected: AtomicBool,
}

impl PeerSlot {
	fn tunn(&self) -> MutexGuard<'_, Tunn> {
		self.tunn.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}

/// State shared between the engine and an interface's driver task.
struct DeviceShared {
	netif: NetifId,
	private_key: WgPrivateKey,
	socket: UdpSocket,
	peers: Mutex<Vec<Option<Arc<PeerSlot>>>>,
	router: Mutex<AllowedIps>,
	inbound: Option<mpsc::Sender<InboundPacket>>,
}

impl DeviceShared {
	fn peers(&self) -> MutexGuard<'_, Vec<Option<Arc<PeerSlot>>>> {
		self.peers.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn router(&self) -> MutexGuard<'_, AllowedIps> {
		self.router.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn peer(&self, index: PeerIndex) -> Option<Arc<PeerSlot>> {
		if !index.is_valid() {
			return None;
		}
		self.peers().get(usize::from(index.get())).cloned().flatten()
	}

	fn connected_peers(&self) -> Vec<(PeerIndex, Arc<PeerSlot>)> {
		self
			.peers()
			.iter()
			.enumerate()
			.filter_map(|(i, slot)| slot.as_ref().map(|s| (i, Arc::clone(s))))
			.filter(|(_, slot)| slot.is_connected())
			.filter_map(|(i, slot)| u8::try_from(i).ok().map(|i| (PeerIndex::new(i), slot)))
			.collect()
	}

	async fn tick_timers(&self, dst: &mut [u8]) {
		for (index, slot) in self.connected_peers() {
			let Some(endpoint) = slot.endpoint else {
				continue;
			};
			let outgoing = {
				let mut tunn = slot.tunn();
				match tunn.update_timers(dst) {
					TunnResult::WriteToNetwork(data) => Some(data.to_vec()),
					TunnResult::Err(e) => {
						debug!(netif = %self.netif, peer = %index, ?e, "timer update error");
						None
					}
					_ => None,
				}
			};
			if let Some(data) = outgoing {
				trace!(len = data.len(), peer = %index, "sending keepalive/handshake");
				if let Err(e) = self.socket.send_to(&data, endpoint).await {
					warn!(peer = %index, error = %e, "failed to send timer packet");
				}
			}
		}
	}

	async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr, dst: &mut [u8]) {
		let Some((index, slot)) = self
			.connected_peers()
			.into_iter()
			.find(|(_, slot)| slot.endpoint == Some(from))
		else {
			trace!(%from, "datagram from unknown endpoint");
			return;
		};

		let mut outgoing = Vec::new();
		let mut inbound = None;
		{
			let mut tunn = slot.tunn();
			match tunn.decapsulate(Some(from.ip()), datagram, dst) {
				TunnResult::Done => trace!("packet processed, no output"),
				TunnResult::WriteToNetwork(data) => {
					outgoing.push(data.to_vec());
					// Flush anything queued behind the handshake.
					while let TunnResult::WriteToNetwork(data) = tunn.decapsulate(None, &[], dst) {
						outgoing.push(data.to_vec());
					}
				}
				TunnResult::WriteToTunnelV4(data, src) => {
					if self.router().allows(index, src) {
						inbound = Some(data.to_vec());
					} else {
						debug!(peer = %index, %src, "dropping packet outside allowed range");
					}
				}
				TunnResult::WriteToTunnelV6(data, _) => {
					trace!(len = data.len(), "dropping IPv6 packet on IPv4 tunnel");
				}
				TunnResult::Err(e) => debug!(peer = %index, ?e, "tunnel decapsulate error"),
			}
		}

		for data in outgoing {
			if let Err(e) = self.socket.send_to(&data, from).await {
				warn!(peer = %index, error = %e, "failed to send handshake response");
			}
		}

		if let (Some(packet), Some(tx)) = (inbound, &self.inbound) {
			let packet = InboundPacket {
				netif: self.netif,
				peer: index,
				packet,
			};
			if let Err(e) = tx.try_send(packet) {
				debug!(error = %e, "inbound channel unavailable, dropping packet");
			}
		}
	}
}

struct Driver {
	shutdown_tx: watch::Sender<bool>,
	handle: JoinHandle<()>,
}

impl Driver {
	fn stop(self) {
		let _ = self.shutdown_tx.send(true);
		self.handle.abort();
	}
}

struct DeviceState {
	shared: Arc<DeviceShared>,
	driver: Option<Driver>,
}

impl DeviceState {
	fn ensure_driver(&mut self, runtime: &Handle, interval: Duration) {
		if self.driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
			return;
		}
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let handle = runtime.spawn(drive(Arc::clone(&self.shared), interval, shutdown_rx));
		self.driver = Some(Driver {
			shutdown_tx,
			handle,
		});
		debug!(netif = %self.shared.netif, "spawned interface driver");
	}

	fn stop_driver(&mut self) {
		if let Some(driver) = self.driver.take() {
			driver.stop();
			debug!(netif = %self.shared.netif, "stopped interface driver");
		}
	}
}

async fn drive(shared: Arc<DeviceShared>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
	let mut buf = vec![0u8; MAX_DATAGRAM];
	let mut dst_buf = vec![0u8; MAX_DATAGRAM];
	let mut timer = tokio::time::interval(interval);
	timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			biased;

			_ = shutdown_rx.changed() => {
				if *shutdown_rx.borrow() {
					info!(netif = %shared.netif, "driver shutting down");
					break;
				}
			}

			_ = timer.tick() => {
				shared.tick_timers(&mut dst_buf).await;
			}

			result = shared.socket.recv_from(&mut buf) => {
				match result {
					Ok((len, from)) => {
						trace!(%from, len, "received datagram");
						shared.handle_datagram(&buf[..len], from, &mut dst_buf).await;
					}
					Err(e) => {
						warn!(error = %e, "UDP recv error");
					}
				}
			}
		}
	}
}

/// Userspace WireGuard engine backed by boringtun.
///
/// Requires a tokio runtime: sockets are registered with the current reactor
/// on `init_interface` and the driver is spawned on `connect`.
pub struct WgEngine {
	config: WgEngineConfig,
	devices: HashMap<NetifId, DeviceState>,
	platform_ready: bool,
}

impl Default for WgEngine {
	fn default() -> Self {
		Self::new(WgEngineConfig::default())
	}
}

impl WgEngine {
	pub fn new(config: WgEngineConfig) -> Self {
		Self {
			config,
			devices: HashMap::new(),
			platform_ready: false,
		}
	}

	pub fn is_platform_ready(&self) -> bool {
		self.platform_ready
	}

	pub fn interface_count(&self) -> usize {
		self.devices.len()
	}

	pub fn local_addr(&self, netif: NetifId) -> Option<SocketAddr> {
		self
			.devices
			.get(&netif)
			.and_then(|d| d.shared.socket.local_addr().ok())
	}

	pub fn peer_count(&self, netif: NetifId) -> usize {
		self
			.devices
			.get(&netif)
			.map(|d| d.shared.peers().iter().flatten().count())
			.unwrap_or(0)
	}

	pub fn is_driving(&self, netif: NetifId) -> bool {
		self
			.devices
			.get(&netif)
			.and_then(|d| d.driver.as_ref())
			.is_some_and(|d| !d.handle.is_finished())
	}

	pub fn peer_stats(&self, netif: NetifId, peer: PeerIndex) -> Option<PeerStats> {
		let slot = self.devices.get(&netif)?.shared.peer(peer)?;
		let last_handshake = slot.tunn().time_since_last_handshake();
		Some(PeerStats {
			public_key: slot.public_key,
			endpoint: slot.endpoint,
			connected: slot.is_connected(),
			last_handshake,
		})
	}

	pub fn allowed_ranges(&self, netif: NetifId, peer: PeerIndex) -> Vec<ipnet::Ipv4Net> {
		self
			.devices
			.get(&netif)
			.map(|d| d.shared.router().ranges_for_peer(peer))
			.unwrap_or_default()
	}

	/// Encrypts an outbound IPv4 packet for the peer whose allowed range covers its destination.
	#[instrument(skip(self, packet), fields(%netif, len = packet.len()))]
	pub async fn send_packet(&self, netif: NetifId, packet: &[u8]) -> Result<()> {
		let device = self
			.devices
			.get(&netif)
			.ok_or(EngineError::UnknownInterface(netif))?;
		let dst = extract_ipv4_dst(packet).ok_or(EngineError::NotIpv4)?;
		let index = device.shared.router().route(dst).ok_or(EngineError::NoRoute(dst))?;
		let slot = device.shared.peer(index).ok_or(EngineError::InvalidPeer(index))?;
		let endpoint = slot.endpoint.ok_or(EngineError::NoEndpoint(index))?;

		let mut dst_buf = vec![0u8; packet.len() + 148];
		let outgoing = {
			let mut tunn = slot.tunn();
			match tunn.encapsulate(packet, &mut dst_buf) {
				TunnResult::WriteToNetwork(data) => Some(data.to_vec()),
				TunnResult::Err(e) => return Err(EngineError::WireGuard(format!("{e:?}"))),
				_ => None,
			}
		};

		// `None` means the packet was queued until the handshake completes.
		if let Some(data) = outgoing {
			trace!(len = data.len(), peer = %index, "sending encrypted packet");
			device.shared.socket.send_to(&data, endpoint).await?;
		}
		Ok(())
	}

	fn bind(&self, netif: NetifId, init: &InterfaceInit) -> Result<DeviceState> {
		let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
		let _guard = runtime.enter();
		let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, init.listen_port))?;
		std_socket.set_nonblocking(true)?;
		let socket = UdpSocket::from_std(std_socket)?;

		Ok(DeviceState {
			shared: Arc::new(DeviceShared {
				netif,
				private_key: init.private_key.clone(),
				socket,
				peers: Mutex::new(vec![None; self.config.max_peers]),
				router: Mutex::new(AllowedIps::new()),
				inbound: self.config.inbound.clone(),
			}),
			driver: None,
		})
	}

	fn try_add_peer(&self, netif: NetifId, peer: &PeerDescriptor) -> Result<PeerIndex> {
		let device = self
			.devices
			.get(&netif)
			.ok_or(EngineError::UnknownInterface(netif))?;
		if let Some(endpoint) = peer.endpoint.filter(|e| !e.is_ipv4()) {
			return Err(EngineError::UnsupportedEndpoint(endpoint));
		}

		let mut peers = device.shared.peers();
		if peers.iter().flatten().any(|p| p.public_key == peer.public_key) {
			return Err(EngineError::WireGuard(format!(
				"peer {} already present",
				peer.public_key
			)));
		}
		let slot = peers
			.iter()
			.position(Option::is_none)
			.ok_or_else(|| EngineError::WireGuard("peer table full".to_string()))?;
		let index = u8::try_from(slot)
			.map(PeerIndex::new)
			.map_err(|_| EngineError::WireGuard("peer table full".to_string()))?;

		let tunn = Tunn::new(
			defguard_boringtun::x25519::StaticSecret::from(*device.shared.private_key.expose_bytes()),
			defguard_boringtun::x25519::PublicKey::from(*peer.public_key.as_bytes()),
			peer.preshared_key,
			peer.persistent_keepalive,
			u32::from(index.get()),
			None,
		);

		peers[slot] = Some(Arc::new(PeerSlot {
			public_key: peer.public_key,
			endpoint: peer.endpoint,
			tunn: Mutex::new(tunn),
			connected: AtomicBool::new(false),
		}));
		drop(peers);

		device.shared.router().add_route(peer.allowed, index);
		Ok(index)
	}

	fn try_connect(&mut self, netif: NetifId, peer: PeerIndex) -> Result<()> {
		let interval = self.config.timer_interval;
		let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
		let device = self
			.devices
			.get_mut(&netif)
			.ok_or(EngineError::UnknownInterface(netif))?;
		let slot = device.shared.peer(peer).ok_or(EngineError::InvalidPeer(peer))?;
		let endpoint = slot.endpoint.ok_or(EngineError::NoEndpoint(peer))?;

		let mut dst_buf = vec![0u8; 148];
		let initiation = {
			let mut tunn = slot.tunn();
			match tunn.format_handshake_initiation(&mut dst_buf, false) {
				TunnResult::WriteToNetwork(data) => Some(data.to_vec()),
				TunnResult::Err(e) => return Err(EngineError::WireGuard(format!("{e:?}"))),
				_ => None,
			}
		};
		slot.connected.store(true, Ordering::SeqCst);

		// A freshly registered socket has no readiness until the reactor runs,
		// so the send has to be awaited rather than attempted inline.
		if let Some(data) = initiation {
			let shared = Arc::clone(&device.shared);
			runtime.spawn(async move {
				match shared.socket.send_to(&data, endpoint).await {
					Ok(_) => trace!(%endpoint, "sent handshake initiation"),
					Err(e) => warn!(%endpoint, error = %e, "failed to send handshake initiation"),
				}
			});
		}

		device.ensure_driver(&runtime, interval);
		Ok(())
	}
}

impl WireGuard for WgEngine {
	fn platform_init(&mut self) {
		if self.platform_ready {
			return;
		}
		self.platform_ready = true;
		info!("WireGuard platform initialised");
	}

	#[instrument(skip(self, init), fields(%netif, listen_port = init.listen_port))]
	fn init_interface(&mut self, netif: NetifId, init: &InterfaceInit) -> std::result::Result<(), WireGuardError> {
		if self.devices.contains_key(&netif) {
			return Err(EngineError::AlreadyInitialised(netif).into());
		}
		let device = self.bind(netif, init)?;
		if let Ok(addr) = device.shared.socket.local_addr() {
			info!(%addr, "bound WireGuard socket");
		}
		self.devices.insert(netif, device);
		Ok(())
	}

	#[instrument(skip(self, peer), fields(%netif, peer = %peer.public_key))]
	fn add_peer(&mut self, netif: NetifId, peer: &PeerDescriptor) -> PeerIndex {
		match self.try_add_peer(netif, peer) {
			Ok(index) => {
				info!(%index, endpoint = ?peer.endpoint, "added peer to WireGuard engine");
				index
			}
			Err(e) => {
				warn!(error = %e, "peer not added");
				PeerIndex::INVALID
			}
		}
	}

	#[instrument(skip(self), fields(%netif, %peer))]
	fn connect(&mut self, netif: NetifId, peer: PeerIndex) -> std::result::Result<(), WireGuardError> {
		self.try_connect(netif, peer)?;
		info!("connecting to peer");
		Ok(())
	}

	#[instrument(skip(self), fields(%netif, %peer))]
	fn disconnect(&mut self, netif: NetifId, peer: PeerIndex) {
		let Some(device) = self.devices.get_mut(&netif) else {
			return;
		};
		if let Some(slot) = device.shared.peer(peer) {
			slot.connected.store(false, Ordering::SeqCst);
		}
		if device.shared.connected_peers().is_empty() {
			device.stop_driver();
		}
		debug!("disconnected peer");
	}

	#[instrument(skip(self), fields(%netif, %peer))]
	fn remove_peer(&mut self, netif: NetifId, peer: PeerIndex) {
		let Some(device) = self.devices.get(&netif) else {
			return;
		};
		if !peer.is_valid() {
			return;
		}
		let removed = device
			.shared
			.peers()
			.get_mut(usize::from(peer.get()))
			.and_then(Option::take);
		if removed.is_some() {
			device.shared.router().remove_peer(peer);
			info!("removed peer from WireGuard engine");
		}
	}

	#[instrument(skip(self), fields(%netif))]
	fn shutdown(&mut self, netif: NetifId) {
		if let Some(mut device) = self.devices.remove(&netif) {
			device.stop_driver();
			info!("shut down WireGuard interface");
		}
	}
}

impl Drop for WgEngine {
	fn drop(&mut self) {
		for device in self.devices.values_mut() {
			device.stop_driver();
		}
	}
}

fn extract_ipv4_dst(packet: &[u8]) -> Option<Ipv4Addr> {
	if packet.len() < 20 || packet[0] >> 4 != 4 {
		return None;
	}
	Some(Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]))
}
