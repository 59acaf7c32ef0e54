// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod commands;

use clap::{Parser, Subcommand};
use commands::{CheckConfigArgs, UpArgs};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "wgnetif", version, about = "Bring a single WireGuard tunnel interface up and down")]
struct Cli {
	/// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Bring the tunnel up on an in-process host stack and keep it up until Ctrl+C.
	///
	/// The interface table and default route live inside this process; no
	/// interface or route is changed on the host.
	Up(UpArgs),
	/// Generate a new private key
	Genkey,
	/// Read a private key from stdin and print its public key
	Pubkey,
	/// Validate a configuration and print it
	CheckConfig(CheckConfigArgs),
}

fn log_level(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	}
}

fn init_tracing(verbose: u8) {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(verbose))))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.verbose);

	match cli.command {
		Command::Up(args) => commands::up::handle_up(args).await,
		Command::Genkey => commands::keys::handle_genkey(),
		Command::Pubkey => commands::keys::handle_pubkey(),
		Command::CheckConfig(args) => commands::check::handle_check_config(args),
	}
}
