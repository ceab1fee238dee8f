// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Curve25519 key material for WireGuard registrations.
//!
//! Everything that touches a key does so in the canonical 44-character
//! padded base64 form: the per-region key files, the provider's `/addKey`
//! endpoint, and NM's wireguard setting all exchange that encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
	#[error("key is not valid base64")]
	BadEncoding,

	#[error("key must decode to 32 bytes, got {0}")]
	BadLength(usize),
}

pub type Result<T> = std::result::Result<T, KeyError>;

fn decode32(encoded: &str) -> Result<[u8; 32]> {
	let bytes = STANDARD
		.decode(encoded.trim())
		.map_err(|_| KeyError::BadEncoding)?;
	<[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| KeyError::BadLength(bytes.len()))
}

/// A region's WireGuard private key.
///
/// The scalar lives inside [`StaticSecret`], which wipes itself on drop.
/// There is no `Display` impl, so the key cannot reach a log line by
/// accident; the one way to read it back out is
/// [`WgPrivateKey::expose_base64`], which keeps exposure explicit wherever
/// the key is written to a file or into NM settings.
#[derive(Clone)]
pub struct WgPrivateKey(StaticSecret);

impl WgPrivateKey {
	pub fn generate() -> Self {
		Self(StaticSecret::random_from_rng(OsRng))
	}

	/// Parse a key file or provider payload. Surrounding whitespace is
	/// tolerated because key files end in a newline.
	pub fn from_base64(encoded: &str) -> Result<Self> {
		Ok(Self(StaticSecret::from(decode32(encoded)?)))
	}

	/// The matching public key, derived on demand. A refresh needs it twice
	/// per cycle at most, so nothing is cached.
	pub fn public_key(&self) -> WgPublicKey {
		WgPublicKey(PublicKey::from(&self.0))
	}

	/// The secret scalar in canonical base64. This is the value that must
	/// never appear in any log or error message.
	pub fn expose_base64(&self) -> String {
		STANDARD.encode(self.0.to_bytes())
	}
}

impl fmt::Debug for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// The public half is enough to identify which key this is.
		write!(f, "WgPrivateKey(pub {})", self.public_key())
	}
}

impl PartialEq for WgPrivateKey {
	fn eq(&self, other: &Self) -> bool {
		self.0.to_bytes() == other.0.to_bytes()
	}
}

impl Eq for WgPrivateKey {}

/// A WireGuard public key: ours (sent to the provider at registration) or
/// the server's (written into the NM peer). Freely printable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgPublicKey(PublicKey);

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(PublicKey::from(bytes))
	}

	pub fn from_base64(encoded: &str) -> Result<Self> {
		Ok(Self(PublicKey::from(decode32(encoded)?)))
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.0.as_bytes())
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "WgPublicKey({})", self.to_base64())
	}
}
