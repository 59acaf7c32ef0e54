// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::load_config;
use clap::Args;
use console::style;
use std::path::PathBuf;
use wgnetif_common::REDACTED;

#[derive(Debug, Clone, Args)]
pub struct CheckConfigArgs {
	/// TOML configuration file (WGNETIF_* environment variables when omitted)
	#[arg(long, short, env = "WGNETIF_CONFIG")]
	pub config: Option<PathBuf>,
}

pub fn handle_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
	let config = load_config(args.config.as_deref())?;

	println!("{} Configuration is valid", style("✓").green().bold());
	println!("[interface]");
	println!("  address      = {}", config.local_address);
	println!("  subnet_mask  = {}", config.subnet_mask);
	println!("  gateway      = {}", config.gateway);
	println!("  listen_port  = {}", config.listen_port);
	println!("  private_key  = {}", style(REDACTED).dim());
	println!("  public_key   = {}", config.private_key.public_key());
	println!("[peer]");
	println!("  address      = {}", config.peer_address);
	println!("  public_key   = {}", config.peer_public_key);
	println!("  port         = {}", config.peer_port);
	Ok(())
}
