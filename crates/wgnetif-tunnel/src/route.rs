// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tracing::{info, instrument, warn};
use wgnetif_common::{NetStack, NetifId};

/// Whatever the host stack reported as its default before promotion.
///
/// Only ever handed back to the stack as a restore target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousDefaultRoute(Option<NetifId>);

impl PreviousDefaultRoute {
	pub fn target(&self) -> Option<NetifId> {
		self.0
	}
}

/// Swaps the host stack's default interface to the tunnel and back.
#[derive(Debug, Default)]
pub struct DefaultRouteController {
	previous: Option<PreviousDefaultRoute>,
}

impl DefaultRouteController {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_promoted(&self) -> bool {
		self.previous.is_some()
	}

	pub fn previous(&self) -> Option<PreviousDefaultRoute> {
		self.previous
	}

	#[instrument(skip(self, stack), fields(%netif))]
	pub fn promote<S: NetStack>(&mut self, stack: &mut S, netif: NetifId) {
		if let Some(previous) = self.previous {
			// Capturing again would overwrite the real restore target with the tunnel.
			warn!(previous = ?previous.target(), "default route already promoted");
			return;
		}
		let previous = PreviousDefaultRoute(stack.default_interface());
		stack.set_default_interface(Some(netif));
		self.previous = Some(previous);
		info!(previous = ?previous.target(), "tunnel promoted to default route");
	}

	/// Puts back the captured default. A no-op when nothing was promoted.
	#[instrument(skip_all)]
	pub fn restore<S: NetStack>(&mut self, stack: &mut S) {
		let Some(previous) = self.previous.take() else {
			return;
		};
		stack.set_default_interface(previous.target());
		info!(restored = ?previous.target(), "default route restored");
	}
}
