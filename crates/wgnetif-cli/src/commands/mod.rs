// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod check;
pub mod keys;
pub mod up;

pub use check::CheckConfigArgs;
pub use up::UpArgs;

use anyhow::Context;
use std::path::Path;
use wgnetif_tunnel::TunnelConfig;

/// Reads the TOML file when given, otherwise the `WGNETIF_*` environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<TunnelConfig> {
	match path {
		Some(path) => TunnelConfig::from_toml_file(path)
			.with_context(|| format!("failed to load {}", path.display())),
		None => TunnelConfig::from_env().context("failed to load configuration from environment"),
	}
}
