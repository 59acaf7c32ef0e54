// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::load_config;
use anyhow::Context;
use clap::Args;
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};
use wgnetif_engine::WgEngine;
use wgnetif_tunnel::{MemoryNetStack, ResolverConfig, SystemResolver, TunnelState, WireGuardTunnel};

#[derive(Debug, Clone, Args)]
pub struct UpArgs {
	/// TOML configuration file (WGNETIF_* environment variables when omitted)
	#[arg(long, short, env = "WGNETIF_CONFIG")]
	pub config: Option<PathBuf>,

	/// Endpoint resolution attempts
	#[arg(long, default_value_t = 5)]
	pub attempts: u32,

	/// Seconds to wait between resolution attempts
	#[arg(long, default_value_t = 2)]
	pub retry_delay_secs: u64,
}

#[instrument(skip(args))]
pub async fn handle_up(args: UpArgs) -> anyhow::Result<()> {
	let config = load_config(args.config.as_deref())?;
	let resolver_config =
		ResolverConfig::new(args.attempts, Duration::from_secs(args.retry_delay_secs));

	let stack = MemoryNetStack::new();
	let mut tunnel = WireGuardTunnel::new(stack.clone(), WgEngine::default(), SystemResolver)
		.with_resolver_config(resolver_config);

	println!(
		"{} Resolving {}...",
		style("→").yellow(),
		style(&config.peer_address).cyan()
	);
	tunnel.begin(&config).await.context("failed to bring the tunnel up")?;

	let status = tunnel.status();
	info!(state = %status.state, "tunnel started");

	match status.state {
		TunnelState::Active => println!("{} Tunnel started", style("✓").green().bold()),
		_ => println!(
			"{} Tunnel interface registered, peer endpoint unknown",
			style("!").yellow().bold()
		),
	}
	println!("  Local IP:  {}", style(config.local_address).cyan());
	println!("  Network:   {}", style(config.interface_network()).cyan());
	if let Some(endpoint) = status.endpoint {
		println!("  Endpoint:  {}", style(endpoint).cyan());
	}
	if let Some(netif) = status.netif {
		println!("  Interface: {}", style(netif).dim());
	}
	println!("  Peer key:  {}", style(&config.peer_public_key).dim());
	println!(
		"  {}",
		style("Host stack is in-process; no host interface or route was changed").dim()
	);

	println!("\nPress Ctrl+C to stop the tunnel...");
	let signal = tokio::signal::ctrl_c().await;
	println!("\n{} Shutting down...", style("→").yellow());

	if let (Some(netif), Some(peer)) = (status.netif, status.peer) {
		if let Some(stats) = tunnel.wireguard().peer_stats(netif, peer) {
			match stats.last_handshake {
				Some(age) => println!("  Last handshake: {}s ago", style(age.as_secs()).dim()),
				None => println!("  {}", style("No handshake completed").dim()),
			}
		}
	}

	tunnel.end();
	println!("{} Tunnel stopped", style("✓").green().bold());

	signal.context("failed to listen for Ctrl+C")
}
