// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::types::RegionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
	/// Credentials were rejected outright (4xx on token issuance).
	#[error("authentication rejected: invalid credentials")]
	AuthInvalid,

	/// The provider reports the account as locked.
	#[error("authentication rejected: account locked")]
	AuthLocked,

	/// A previously issued token was rejected. The caller re-authenticates
	/// and retries once.
	#[error("auth token rejected by server")]
	TokenExpired,

	/// The server refused to register the offered public key.
	#[error("server rejected public key registration (status {0:?})")]
	KeyRejected(String),

	#[error("region not offered by provider: {0}")]
	UnknownRegion(RegionId),

	/// A provider response failed shape validation. Carries the field name
	/// only, never the value.
	#[error("malformed provider response: field {field}")]
	InvalidResponse { field: &'static str },

	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("unexpected HTTP status: {0}")]
	UnexpectedStatus(reqwest::StatusCode),

	#[error("{0}")]
	Other(String),
}

impl ApiError {
	/// Transport-level failures eligible for the single immediate retry.
	pub fn is_transport(&self) -> bool {
		match self {
			ApiError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, ApiError>;
