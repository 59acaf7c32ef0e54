// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Subnet used when the caller has no routing topology: the interface only owns its own address.
pub const HOST_ONLY_MASK: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Gateway value meaning "no gateway".
pub const NO_GATEWAY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("subnet mask {0} is not contiguous")]
pub struct InvalidMask(pub Ipv4Addr);

/// The allowed range that routes every destination through a peer (`0.0.0.0/0`).
pub fn full_tunnel() -> Ipv4Net {
	Ipv4Net::default()
}

pub fn mask_to_prefix(mask: Ipv4Addr) -> Result<u8, InvalidMask> {
	let bits = u32::from(mask);
	let prefix = bits.leading_ones();
	if bits.checked_shl(prefix).unwrap_or(0) != 0 {
		return Err(InvalidMask(mask));
	}
	Ok(prefix as u8)
}

pub fn prefix_to_mask(prefix: u8) -> Ipv4Addr {
	let prefix = u32::from(prefix.min(32));
	let bits = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
	Ipv4Addr::from(bits)
}

/// The network an interface with `address`/`mask` is directly attached to.
pub fn interface_network(address: Ipv4Addr, mask: Ipv4Addr) -> Result<Ipv4Net, InvalidMask> {
	let prefix = mask_to_prefix(mask)?;
	let net = Ipv4Net::new(address, prefix).map_err(|_| InvalidMask(mask))?;
	Ok(net.trunc())
}
