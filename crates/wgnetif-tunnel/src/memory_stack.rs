// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process host stack: a fixed-size interface table plus a default pointer.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};
use wgnetif_common::{InterfaceDescriptor, NetStack, NetifId, StackError};

pub const DEFAULT_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
	pub descriptor: InterfaceDescriptor,
	pub up: bool,
}

#[derive(Debug)]
struct Inner {
	slots: Vec<Option<InterfaceInfo>>,
	default: Option<NetifId>,
}

/// Clones share the same table.
#[derive(Debug, Clone)]
pub struct MemoryNetStack {
	inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryNetStack {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}
}

impl MemoryNetStack {
	pub fn new() -> Self {
		Self::default()
	}

	/// Capacity is clamped to the number of addressable slots.
	pub fn with_capacity(capacity: usize) -> Self {
		let capacity = capacity.min(usize::from(u8::MAX) + 1);
		Self {
			inner: Arc::new(Mutex::new(Inner {
				slots: vec![None; capacity],
				default: None,
			})),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn capacity(&self) -> usize {
		self.lock().slots.len()
	}

	pub fn interface_count(&self) -> usize {
		self.lock().slots.iter().flatten().count()
	}

	pub fn interface(&self, netif: NetifId) -> Option<InterfaceInfo> {
		self.lock().slots.get(usize::from(netif.slot())).cloned().flatten()
	}

	pub fn is_up(&self, netif: NetifId) -> bool {
		self.interface(netif).is_some_and(|info| info.up)
	}

	pub fn find(&self, name: &str) -> Option<NetifId> {
		let inner = self.lock();
		inner
			.slots
			.iter()
			.position(|slot| slot.as_ref().is_some_and(|info| info.descriptor.name == name))
			.and_then(|i| u8::try_from(i).ok())
			.map(NetifId::new)
	}
}

impl NetStack for MemoryNetStack {
	fn add_interface(&mut self, descriptor: &InterfaceDescriptor) -> Result<NetifId, StackError> {
		if descriptor.name.is_empty() {
			return Err(StackError::Rejected("interface name is empty".to_string()));
		}
		let mut inner = self.lock();
		let capacity = inner.slots.len();
		let slot = inner
			.slots
			.iter()
			.position(Option::is_none)
			.ok_or(StackError::NoFreeSlot { capacity })?;
		let id = u8::try_from(slot)
			.map(NetifId::new)
			.map_err(|_| StackError::NoFreeSlot { capacity })?;

		inner.slots[slot] = Some(InterfaceInfo {
			descriptor: descriptor.clone(),
			up: false,
		});
		debug!(netif = %id, name = %descriptor.name, address = %descriptor.address, "registered interface");
		Ok(id)
	}

	fn remove_interface(&mut self, netif: NetifId) {
		let mut inner = self.lock();
		let removed = inner
			.slots
			.get_mut(usize::from(netif.slot()))
			.and_then(Option::take);
		if removed.is_none() {
			trace!(%netif, "remove of unknown interface ignored");
			return;
		}
		if inner.default == Some(netif) {
			inner.default = None;
			debug!(%netif, "removed interface was the default; default cleared");
		}
		debug!(%netif, "unregistered interface");
	}

	fn set_up(&mut self, netif: NetifId) {
		if let Some(Some(info)) = self.lock().slots.get_mut(usize::from(netif.slot())) {
			info.up = true;
		}
	}

	fn set_down(&mut self, netif: NetifId) {
		if let Some(Some(info)) = self.lock().slots.get_mut(usize::from(netif.slot())) {
			info.up = false;
		}
	}

	fn default_interface(&self) -> Option<NetifId> {
		self.lock().default
	}

	fn set_default_interface(&mut self, netif: Option<NetifId>) {
		let mut inner = self.lock();
		let known = netif.filter(|id| {
			inner
				.slots
				.get(usize::from(id.slot()))
				.is_some_and(Option::is_some)
		});
		if netif.is_some() && known.is_none() {
			debug!(netif = ?netif, "default set to unknown interface; clearing default");
		}
		inner.default = known;
	}
}
