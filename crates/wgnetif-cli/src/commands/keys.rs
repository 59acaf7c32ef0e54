// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use anyhow::Context;
use std::io::Read;
use wgnetif_common::WgPrivateKey;
use zeroize::Zeroizing;

pub fn handle_genkey() -> anyhow::Result<()> {
	let key = WgPrivateKey::generate();
	println!("{}", key.to_base64().as_str());
	Ok(())
}

pub fn handle_pubkey() -> anyhow::Result<()> {
	let mut input = Zeroizing::new(String::new());
	std::io::stdin()
		.read_to_string(&mut input)
		.context("failed to read private key from stdin")?;
	println!("{}", public_key_for(&input)?);
	Ok(())
}

fn public_key_for(encoded: &str) -> anyhow::Result<String> {
	let key = WgPrivateKey::parse(encoded.trim()).context("invalid private key")?;
	Ok(key.public_key().to_base64())
}
