// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use thiserror::Error;
use wgnetif_common::{KeyError, StackError, WgPublicKey, WireGuardError};

#[derive(Debug, Error)]
pub enum ResolutionError {
	#[error("peer address is empty")]
	EmptyAddress,

	#[error("failed to resolve {address} after {attempts} attempts: {last_error}")]
	Exhausted {
		address: String,
		attempts: u32,
		#[source]
		last_error: std::io::Error,
	},
}

#[derive(Debug, Error)]
pub enum CreationError {
	#[error("a tunnel interface is already active")]
	AlreadyActive,

	#[error("host stack rejected interface registration: {0}")]
	Rejected(#[source] StackError),

	#[error("WireGuard driver initialisation failed: {0}")]
	Driver(#[source] WireGuardError),
}

#[derive(Debug, Error)]
pub enum PeerError {
	#[error("no tunnel interface to attach the peer to")]
	NoInterface,

	#[error("a peer is already attached to the tunnel interface")]
	AlreadyAttached,

	#[error("peer {public_key} rejected by the WireGuard peer table")]
	Rejected { public_key: WgPublicKey },
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing environment variable: {0}")]
	MissingEnv(String),

	#[error("missing required field: {0}")]
	MissingField(String),

	#[error("invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },

	#[error("invalid key in {field}: {source}")]
	Key {
		field: String,
		#[source]
		source: KeyError,
	},

	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

impl ConfigError {
	pub fn missing_field(field: impl Into<String>) -> Self {
		Self::MissingField(field.into())
	}

	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}

	pub fn key(field: impl Into<String>, source: KeyError) -> Self {
		Self::Key {
			field: field.into(),
			source,
		}
	}
}

#[derive(Debug, Error)]
pub enum TunnelError {
	#[error(transparent)]
	Resolution(#[from] ResolutionError),

	#[error(transparent)]
	Creation(#[from] CreationError),

	#[error(transparent)]
	Peer(#[from] PeerError),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
