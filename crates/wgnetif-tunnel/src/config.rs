// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel configuration: constructors, environment loading and TOML files.
//!
//! Environment variables use the `WGNETIF_` prefix. The private key may be
//! supplied directly (`WGNETIF_PRIVATE_KEY`) or as a path to a file holding it
//! (`WGNETIF_PRIVATE_KEY_FILE`); the file form takes precedence and a single
//! trailing newline is stripped.

use crate::error::ConfigError;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wgnetif_common::{
	interface_network, mask_to_prefix, WgPrivateKey, WgPublicKey, HOST_ONLY_MASK, NO_GATEWAY,
};

pub const ENV_LOCAL_ADDRESS: &str = "WGNETIF_LOCAL_ADDRESS";
pub const ENV_SUBNET_MASK: &str = "WGNETIF_SUBNET_MASK";
pub const ENV_GATEWAY: &str = "WGNETIF_GATEWAY";
pub const ENV_PRIVATE_KEY: &str = "WGNETIF_PRIVATE_KEY";
pub const ENV_PEER_ADDRESS: &str = "WGNETIF_PEER_ADDRESS";
pub const ENV_PEER_PUBLIC_KEY: &str = "WGNETIF_PEER_PUBLIC_KEY";
pub const ENV_PEER_PORT: &str = "WGNETIF_PEER_PORT";
pub const ENV_LISTEN_PORT: &str = "WGNETIF_LISTEN_PORT";

pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 5;
pub const DEFAULT_RESOLVE_DELAY: Duration = Duration::from_secs(2);

/// Everything needed to bring up the tunnel.
///
/// Borrowed by [`WireGuardTunnel::begin`](crate::WireGuardTunnel::begin) for the
/// duration of setup. `Debug` never prints the private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
	pub private_key: WgPrivateKey,
	pub listen_port: u16,
	pub local_address: Ipv4Addr,
	pub subnet_mask: Ipv4Addr,
	pub gateway: Ipv4Addr,
	pub peer_address: String,
	pub peer_public_key: WgPublicKey,
	pub peer_port: u16,
}

impl TunnelConfig {
	/// The listen port defaults to the peer port.
	pub fn new(
		local_address: Ipv4Addr,
		subnet_mask: Ipv4Addr,
		gateway: Ipv4Addr,
		private_key: WgPrivateKey,
		peer_address: impl Into<String>,
		peer_public_key: WgPublicKey,
		peer_port: u16,
	) -> Result<Self, ConfigError> {
		let config = Self {
			private_key,
			listen_port: peer_port,
			local_address,
			subnet_mask,
			gateway,
			peer_address: peer_address.into(),
			peer_public_key,
			peer_port,
		};
		config.validate()?;
		Ok(config)
	}

	/// Host-only interface: subnet `255.255.255.255`, no gateway.
	pub fn host_only(
		local_address: Ipv4Addr,
		private_key: WgPrivateKey,
		peer_address: impl Into<String>,
		peer_public_key: WgPublicKey,
		peer_port: u16,
	) -> Result<Self, ConfigError> {
		Self::new(
			local_address,
			HOST_ONLY_MASK,
			NO_GATEWAY,
			private_key,
			peer_address,
			peer_public_key,
			peer_port,
		)
	}

	pub fn with_listen_port(mut self, port: u16) -> Self {
		self.listen_port = port;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.peer_address.is_empty() {
			return Err(ConfigError::invalid_value("peer_address", "must not be empty"));
		}
		if self.peer_port == 0 {
			return Err(ConfigError::invalid_value("peer_port", "must not be 0"));
		}
		mask_to_prefix(self.subnet_mask)
			.map_err(|e| ConfigError::invalid_value("subnet_mask", e.to_string()))?;
		Ok(())
	}

	pub fn interface_network(&self) -> ipnet::Ipv4Net {
		// Mask validity is checked at construction.
		interface_network(self.local_address, self.subnet_mask)
			.unwrap_or_else(|_| ipnet::Ipv4Net::from(self.local_address))
	}

	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Like [`from_env`](Self::from_env), reading variables through `lookup`.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let require = |name: &str| lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()));

		let local_address = parse_value(ENV_LOCAL_ADDRESS, &require(ENV_LOCAL_ADDRESS)?)?;
		let subnet_mask = match lookup(ENV_SUBNET_MASK) {
			Some(value) => parse_value(ENV_SUBNET_MASK, &value)?,
			None => HOST_ONLY_MASK,
		};
		let gateway = match lookup(ENV_GATEWAY) {
			Some(value) => parse_value(ENV_GATEWAY, &value)?,
			None => NO_GATEWAY,
		};
		let private_key = load_private_key(&lookup)?;
		let peer_address = require(ENV_PEER_ADDRESS)?;
		let peer_public_key = WgPublicKey::parse(require(ENV_PEER_PUBLIC_KEY)?.trim())
			.map_err(|e| ConfigError::key(ENV_PEER_PUBLIC_KEY, e))?;
		let peer_port = parse_value(ENV_PEER_PORT, &require(ENV_PEER_PORT)?)?;

		let mut config = Self::new(
			local_address,
			subnet_mask,
			gateway,
			private_key,
			peer_address,
			peer_public_key,
			peer_port,
		)?;
		if let Some(value) = lookup(ENV_LISTEN_PORT) {
			config.listen_port = parse_value(ENV_LISTEN_PORT, &value)?;
		}
		Ok(config)
	}

	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let file: FileConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})?;
		file.into_config(path.parent())
	}

	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		let file: FileConfig = toml::from_str(content).map_err(|source| ConfigError::TomlParse {
			path: PathBuf::from("<string>"),
			source,
		})?;
		file.into_config(None)
	}
}

fn parse_value<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
	T: std::str::FromStr,
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e: T::Err| ConfigError::invalid_value(field, e.to_string()))
}

fn load_private_key<F>(lookup: &F) -> Result<WgPrivateKey, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let file_var = format!("{ENV_PRIVATE_KEY}_FILE");

	if let Some(path) = lookup(&file_var) {
		if path.is_empty() {
			return Err(ConfigError::invalid_value(file_var, "path is empty"));
		}
		return read_key_file(Path::new(&path), &file_var);
	}

	let value = lookup(ENV_PRIVATE_KEY).ok_or_else(|| ConfigError::MissingEnv(ENV_PRIVATE_KEY.to_string()))?;
	WgPrivateKey::parse(value.trim()).map_err(|e| ConfigError::key(ENV_PRIVATE_KEY, e))
}

fn read_key_file(path: &Path, field: &str) -> Result<WgPrivateKey, ConfigError> {
	let content = zeroize::Zeroizing::new(std::fs::read_to_string(path).map_err(|source| {
		ConfigError::Io {
			path: path.to_path_buf(),
			source,
		}
	})?);
	let encoded = content.strip_suffix('\n').unwrap_or(&content);
	WgPrivateKey::parse(encoded).map_err(|e| ConfigError::key(field, e))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
	interface: InterfaceSection,
	peer: PeerSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InterfaceSection {
	address: Ipv4Addr,
	#[serde(default)]
	subnet_mask: Option<Ipv4Addr>,
	#[serde(default)]
	gateway: Option<Ipv4Addr>,
	#[serde(default)]
	private_key: Option<WgPrivateKey>,
	#[serde(default)]
	private_key_file: Option<PathBuf>,
	#[serde(default)]
	listen_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PeerSection {
	address: String,
	public_key: WgPublicKey,
	port: u16,
}

impl FileConfig {
	/// Relative `private_key_file` paths resolve against `base`.
	fn into_config(self, base: Option<&Path>) -> Result<TunnelConfig, ConfigError> {
		let interface = self.interface;
		let private_key = match (interface.private_key, interface.private_key_file) {
			(Some(_), Some(_)) => {
				return Err(ConfigError::invalid_value(
					"interface.private_key",
					"set either private_key or private_key_file, not both",
				))
			}
			(Some(key), None) => key,
			(None, Some(path)) => {
				let path = match base {
					Some(base) if path.is_relative() => base.join(path),
					_ => path,
				};
				read_key_file(&path, "interface.private_key_file")?
			}
			(None, None) => return Err(ConfigError::missing_field("interface.private_key")),
		};

		let config = TunnelConfig::new(
			interface.address,
			interface.subnet_mask.unwrap_or(HOST_ONLY_MASK),
			interface.gateway.unwrap_or(NO_GATEWAY),
			private_key,
			self.peer.address,
			self.peer.public_key,
			self.peer.port,
		)?;
		Ok(match interface.listen_port {
			Some(port) => config.with_listen_port(port),
			None => config,
		})
	}
}

/// Retry policy for endpoint resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		Self {
			attempts: DEFAULT_RESOLVE_ATTEMPTS,
			delay: DEFAULT_RESOLVE_DELAY,
		}
	}
}

impl ResolverConfig {
	/// `attempts` is clamped to at least one.
	pub fn new(attempts: u32, delay: Duration) -> Self {
		Self {
			attempts: attempts.max(1),
			delay,
		}
	}

	pub fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = attempts.max(1);
		self
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}
}
