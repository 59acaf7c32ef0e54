// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recording doubles for the host stack, WireGuard and resolver collaborators.

use crate::config::TunnelConfig;
use crate::memory_stack::MemoryNetStack;
use crate::resolver::Resolve;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use wgnetif_common::{
	InterfaceDescriptor, InterfaceInit, NetStack, NetifId, PeerDescriptor, PeerIndex, StackError,
	WgKeyPair, WgPrivateKey, WireGuard, WireGuardError,
};

pub fn config() -> TunnelConfig {
	TunnelConfig::new(
		Ipv4Addr::new(10, 0, 0, 2),
		Ipv4Addr::new(255, 255, 255, 0),
		Ipv4Addr::new(10, 0, 0, 1),
		WgPrivateKey::generate(),
		"example.com",
		*WgKeyPair::generate().public_key(),
		51820,
	)
	.unwrap()
}

/// Ordered record of collaborator calls, shared by all doubles in a test.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(&self, call: &str) {
		self.0.lock().unwrap().push(call.to_string());
	}

	pub fn calls(&self) -> Vec<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn clear(&self) {
		self.0.lock().unwrap().clear();
	}

	pub fn position(&self, call: &str) -> Option<usize> {
		self.calls().iter().position(|c| c == call)
	}
}

pub struct RecordingStack {
	inner: MemoryNetStack,
	log: CallLog,
}

impl RecordingStack {
	pub fn new(inner: MemoryNetStack, log: CallLog) -> Self {
		Self { inner, log }
	}

	pub fn inner(&self) -> &MemoryNetStack {
		&self.inner
	}
}

impl NetStack for RecordingStack {
	fn add_interface(&mut self, descriptor: &InterfaceDescriptor) -> Result<NetifId, StackError> {
		self.log.record("stack.add_interface");
		self.inner.add_interface(descriptor)
	}

	fn remove_interface(&mut self, netif: NetifId) {
		self.log.record("stack.remove_interface");
		self.inner.remove_interface(netif)
	}

	fn set_up(&mut self, netif: NetifId) {
		self.log.record("stack.set_up");
		self.inner.set_up(netif)
	}

	fn set_down(&mut self, netif: NetifId) {
		self.log.record("stack.set_down");
		self.inner.set_down(netif)
	}

	fn default_interface(&self) -> Option<NetifId> {
		self.log.record("stack.default_interface");
		self.inner.default_interface()
	}

	fn set_default_interface(&mut self, netif: Option<NetifId>) {
		self.log.record("stack.set_default_interface");
		self.inner.set_default_interface(netif)
	}
}

#[derive(Default)]
pub struct FakeWireGuard {
	log: CallLog,
	fail_init: bool,
	reject_peers: bool,
	fail_connect: bool,
	next_index: u8,
	last_peer: Option<PeerDescriptor>,
}

impl FakeWireGuard {
	pub fn new(log: CallLog) -> Self {
		Self {
			log,
			..Default::default()
		}
	}

	pub fn failing_init(mut self) -> Self {
		self.fail_init = true;
		self
	}

	pub fn rejecting_peers(mut self) -> Self {
		self.reject_peers = true;
		self
	}

	pub fn failing_connect(mut self) -> Self {
		self.fail_connect = true;
		self
	}

	pub fn last_peer(&self) -> Option<&PeerDescriptor> {
		self.last_peer.as_ref()
	}
}

impl WireGuard for FakeWireGuard {
	fn platform_init(&mut self) {
		self.log.record("wg.platform_init");
	}

	fn init_interface(&mut self, _netif: NetifId, _init: &InterfaceInit) -> Result<(), WireGuardError> {
		self.log.record("wg.init_interface");
		if self.fail_init {
			return Err(WireGuardError::Driver("init failed".to_string()));
		}
		Ok(())
	}

	fn add_peer(&mut self, _netif: NetifId, peer: &PeerDescriptor) -> PeerIndex {
		self.log.record("wg.add_peer");
		if self.reject_peers {
			return PeerIndex::INVALID;
		}
		self.last_peer = Some(peer.clone());
		let index = PeerIndex::new(self.next_index);
		self.next_index += 1;
		index
	}

	fn connect(&mut self, _netif: NetifId, peer: PeerIndex) -> Result<(), WireGuardError> {
		self.log.record("wg.connect");
		if self.fail_connect {
			return Err(WireGuardError::InvalidPeer(peer));
		}
		Ok(())
	}

	fn disconnect(&mut self, _netif: NetifId, _peer: PeerIndex) {
		self.log.record("wg.disconnect");
	}

	fn remove_peer(&mut self, _netif: NetifId, _peer: PeerIndex) {
		self.log.record("wg.remove_peer");
	}

	fn shutdown(&mut self, _netif: NetifId) {
		self.log.record("wg.shutdown");
	}
}

/// Answers lookups from a script, then from a fallback.
pub struct ScriptedResolver {
	script: Mutex<VecDeque<io::Result<Vec<IpAddr>>>>,
	fallback: Option<Vec<IpAddr>>,
	calls: AtomicU32,
	log: Option<CallLog>,
}

impl ScriptedResolver {
	pub fn new(script: Vec<io::Result<Vec<IpAddr>>>) -> Self {
		Self {
			script: Mutex::new(script.into()),
			fallback: None,
			calls: AtomicU32::new(0),
			log: None,
		}
	}

	pub fn always(records: Vec<IpAddr>) -> Self {
		Self {
			fallback: Some(records),
			..Self::new(Vec::new())
		}
	}

	pub fn failing() -> Self {
		Self::new(Vec::new())
	}

	pub fn with_log(mut self, log: CallLog) -> Self {
		self.log = Some(log);
		self
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Resolve for ScriptedResolver {
	async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(log) = &self.log {
			log.record("resolver.lookup");
		}
		if let Some(answer) = self.script.lock().unwrap().pop_front() {
			return answer;
		}
		match &self.fallback {
			Some(records) => Ok(records.clone()),
			None => Err(io::Error::new(io::ErrorKind::TimedOut, "lookup timed out")),
		}
	}
}
