// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::{debug, instrument, warn};
use wgnetif_common::PeerIndex;

/// Cryptokey routing table: which peer owns which destination range.
///
/// Lookups pick the longest matching prefix.
#[derive(Debug, Default)]
pub struct AllowedIps {
	routes: Vec<(Ipv4Net, PeerIndex)>,
}

impl AllowedIps {
	pub fn new() -> Self {
		Self { routes: Vec::new() }
	}

	#[instrument(skip(self), fields(%net, %peer))]
	pub fn add_route(&mut self, net: Ipv4Net, peer: PeerIndex) {
		let net = net.trunc();
		if let Some(entry) = self.routes.iter_mut().find(|(n, _)| *n == net) {
			if entry.1 == peer {
				return;
			}
			warn!(old_peer = %entry.1, "allowed range reassigned to different peer");
			entry.1 = peer;
			return;
		}
		self.routes.push((net, peer));
		debug!("added allowed range");
	}

	#[instrument(skip(self), fields(%peer))]
	pub fn remove_peer(&mut self, peer: PeerIndex) {
		let before = self.routes.len();
		self.routes.retain(|(_, p)| *p != peer);
		debug!(count = before - self.routes.len(), "removed allowed ranges for peer");
	}

	pub fn route(&self, dst: Ipv4Addr) -> Option<PeerIndex> {
		self
			.routes
			.iter()
			.filter(|(net, _)| net.contains(&dst))
			.max_by_key(|(net, _)| net.prefix_len())
			.map(|(_, peer)| *peer)
	}

	/// Whether a packet from `src` decrypted under `peer` is permitted.
	pub fn allows(&self, peer: PeerIndex, src: Ipv4Addr) -> bool {
		self.route(src) == Some(peer)
	}

	pub fn route_count(&self) -> usize {
		self.routes.len()
	}

	pub fn ranges_for_peer(&self, peer: PeerIndex) -> Vec<Ipv4Net> {
		self
			.routes
			.iter()
			.filter(|(_, p)| *p == peer)
			.map(|(net, _)| *net)
			.collect()
	}
}
