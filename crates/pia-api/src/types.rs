// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use pia_wg::WgPublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

/// Placeholder printed wherever a credential would otherwise appear.
const REDACTED: &str = "******";

/// Short region identifier as PIA names them, e.g. `us_east` or `japan`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

#[derive(Error, Debug)]
#[error("invalid region id: must be non-empty lowercase letters, digits, '_' or '-'")]
pub struct InvalidRegionId;

impl RegionId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RegionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RegionId {
	type Err = InvalidRegionId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty()
			|| !s
				.chars()
				.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
		{
			return Err(InvalidRegionId);
		}
		Ok(Self(s.to_string()))
	}
}

/// Opaque bearer token minted by the provider, good for roughly 24 hours.
/// Its memory is wiped on drop; there is no `Display`, and `Debug` prints a
/// placeholder, so the token cannot reach a log line. Reading the value is
/// an explicit [`AuthToken::expose`] at the one call site that builds the
/// registration request.
pub struct AuthToken(Zeroizing<String>);

impl AuthToken {
	pub fn new(token: String) -> Self {
		Self(Zeroizing::new(token))
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for AuthToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "AuthToken({REDACTED})")
	}
}

/// The PIA account password, as read from the secret store or the
/// terminal. Held in memory only for the duration of one refresh cycle and
/// wiped on drop. Same exposure rules as [`AuthToken`].
#[derive(Clone)]
pub struct AccountPassword(Zeroizing<String>);

impl AccountPassword {
	pub fn new(password: String) -> Self {
		Self(Zeroizing::new(password))
	}

	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for AccountPassword {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "AccountPassword({REDACTED})")
	}
}

/// One WireGuard server inside a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgServer {
	pub ip: Ipv4Addr,
	pub hostname: String,
}

/// A region as advertised by the provider's server list.
#[derive(Debug, Clone)]
pub struct RegionDescriptor {
	pub id: RegionId,
	pub label: String,
	pub port_forwarding: bool,
	pub wg_servers: Vec<WgServer>,
}

/// Connection parameters returned by a successful key registration.
/// Ephemeral; replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDetails {
	pub server_pubkey: WgPublicKey,
	pub server_endpoint: SocketAddr,
	pub peer_ip: Ipv4Addr,
	pub dns_servers: Vec<Ipv4Addr>,
	pub server_label: String,
}
