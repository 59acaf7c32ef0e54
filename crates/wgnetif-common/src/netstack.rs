// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Contract with the host network stack: the interface table and the default-route pointer.

use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const DEFAULT_MTU: u16 = 1420;

/// Identifies a registered interface in the host stack's interface table.
///
/// This is a plain lookup key. Holding one says nothing about whether the
/// interface is still registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetifId(u8);

impl NetifId {
	pub const fn new(slot: u8) -> Self {
		Self(slot)
	}

	pub fn slot(&self) -> u8 {
		self.0
	}
}

impl fmt::Display for NetifId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "netif{}", self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
	pub name: String,
	pub address: Ipv4Addr,
	pub netmask: Ipv4Addr,
	pub gateway: Ipv4Addr,
	pub mtu: u16,
}

impl InterfaceDescriptor {
	pub fn new(name: impl Into<String>, address: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
		Self {
			name: name.into(),
			address,
			netmask,
			gateway,
			mtu: DEFAULT_MTU,
		}
	}

	pub fn with_mtu(mut self, mtu: u16) -> Self {
		self.mtu = mtu;
		self
	}
}

#[derive(Debug, Error)]
pub enum StackError {
	#[error("no free interface slot (capacity {capacity})")]
	NoFreeSlot { capacity: usize },

	#[error("unknown interface {0}")]
	UnknownInterface(NetifId),

	#[error("interface registration rejected: {0}")]
	Rejected(String),
}

/// Interface table and default-route operations of the host network stack.
///
/// Implementations are expected to be fast and non-blocking. Removal and
/// default-route calls on interfaces the stack no longer knows are ignored.
pub trait NetStack {
	fn add_interface(&mut self, descriptor: &InterfaceDescriptor) -> Result<NetifId, StackError>;

	fn remove_interface(&mut self, netif: NetifId);

	/// Marks the interface administratively up. Link state is driven separately.
	fn set_up(&mut self, netif: NetifId);

	fn set_down(&mut self, netif: NetifId);

	fn default_interface(&self) -> Option<NetifId>;

	fn set_default_interface(&mut self, netif: Option<NetifId>);
}
