// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer endpoint resolution with bounded retry.

use crate::config::ResolverConfig;
use crate::error::ResolutionError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use tracing::{info, instrument, warn};

/// Name lookup backend. May return several records; order is preserved.
#[async_trait]
pub trait Resolve: Send + Sync {
	async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system's resolver, keeping IPv4 records only.
///
/// The tunnel interface and its transport are IPv4; a host with only AAAA
/// records yields an empty answer, which the retry loop treats as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
	async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
		let addrs = tokio::net::lookup_host((host, 0)).await?;
		Ok(addrs.map(|addr| addr.ip()).filter(IpAddr::is_ipv4).collect())
	}
}

/// Fixed hosts table. Literal addresses resolve without consulting the table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
	hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_host(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
		self.hosts.entry(host.into()).or_default().push(addr);
		self
	}
}

#[async_trait]
impl Resolve for StaticResolver {
	async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
		if let Ok(addr) = host.parse::<IpAddr>() {
			return Ok(vec![addr]);
		}
		self.hosts.get(host).cloned().ok_or_else(|| {
			io::Error::new(io::ErrorKind::NotFound, format!("no host entry for {host}"))
		})
	}
}

#[async_trait]
impl<R: Resolve + ?Sized> Resolve for Box<R> {
	async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
		(**self).lookup(host).await
	}
}

/// Turns the peer address into a numeric address, retrying failed lookups.
///
/// Waits `delay` between attempts by suspending the task. Only lookup failures
/// are retried; the first record of a successful lookup is returned as-is.
#[derive(Debug, Clone)]
pub struct EndpointResolver<R> {
	resolver: R,
	config: ResolverConfig,
}

impl<R: Resolve> EndpointResolver<R> {
	pub fn new(resolver: R) -> Self {
		Self::with_config(resolver, ResolverConfig::default())
	}

	pub fn with_config(resolver: R, config: ResolverConfig) -> Self {
		Self {
			resolver,
			config: ResolverConfig::new(config.attempts, config.delay),
		}
	}

	pub fn config(&self) -> &ResolverConfig {
		&self.config
	}

	pub fn set_config(&mut self, config: ResolverConfig) {
		self.config = ResolverConfig::new(config.attempts, config.delay);
	}

	pub fn backend(&self) -> &R {
		&self.resolver
	}

	#[instrument(skip(self), fields(attempts = self.config.attempts))]
	pub async fn resolve(&self, address: &str) -> Result<IpAddr, ResolutionError> {
		if address.is_empty() {
			return Err(ResolutionError::EmptyAddress);
		}

		let attempts = self.config.attempts;
		let mut last_error = io::Error::new(io::ErrorKind::NotFound, "not attempted");

		for attempt in 1..=attempts {
			match self.resolver.lookup(address).await {
				Ok(records) => match records.first() {
					Some(endpoint) => {
						info!(%endpoint, attempt, "resolved peer endpoint");
						return Ok(*endpoint);
					}
					None => {
						last_error = io::Error::new(io::ErrorKind::NotFound, "no address records");
					}
				},
				Err(e) => last_error = e,
			}

			warn!(attempt, error = %last_error, "endpoint resolution failed");
			if attempt < attempts {
				tokio::time::sleep(self.config.delay).await;
			}
		}

		Err(ResolutionError::Exhausted {
			address: address.to_string(),
			attempts,
			last_error,
		})
	}
}
