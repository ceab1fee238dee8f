// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use pia_api::{ApiError, RegionId};
use pia_netmgr::NmError;
use std::fmt;
use thiserror::Error;

/// Failure classes a refresh can end in. Kinds drive both the retry policy
/// inside the controller and the Ok/Warn/Err grouping in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	AuthPermanent,
	TokenExpired,
	KeyRejected,
	NetTransient,
	DBusTransient,
	VersionMismatch,
	NotAuthorized,
	Validation,
	Cancelled,
	Io,
}

impl FailureKind {
	/// Warnings are failures a later cycle is expected to clear on its own.
	pub fn is_warning(self) -> bool {
		matches!(
			self,
			FailureKind::NetTransient | FailureKind::DBusTransient | FailureKind::VersionMismatch
		)
	}

	pub fn label(self) -> &'static str {
		match self {
			FailureKind::AuthPermanent => "authentication failed",
			FailureKind::TokenExpired => "token expired",
			FailureKind::KeyRejected => "key rejected",
			FailureKind::NetTransient => "network failure",
			FailureKind::DBusTransient => "D-Bus failure",
			FailureKind::VersionMismatch => "reapply conflict",
			FailureKind::NotAuthorized => "not authorized",
			FailureKind::Validation => "invalid data",
			FailureKind::Cancelled => "cancelled",
			FailureKind::Io => "I/O failure",
		}
	}
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// A refresh failure, annotated with the region and the operation that
/// failed. Messages never contain credentials, tokens, or key bytes.
#[derive(Error, Debug)]
#[error("{region}: {operation}: {message}")]
pub struct RefreshError {
	pub region: RegionId,
	pub operation: &'static str,
	pub kind: FailureKind,
	pub message: String,
}

impl RefreshError {
	pub fn new(
		region: &RegionId,
		operation: &'static str,
		kind: FailureKind,
		message: impl Into<String>,
	) -> Self {
		Self {
			region: region.clone(),
			operation,
			kind,
			message: message.into(),
		}
	}
}

/// Provider-error classification. Transport errors have already been
/// retried once inside the client.
pub fn classify_api(e: &ApiError) -> FailureKind {
	match e {
		ApiError::AuthInvalid | ApiError::AuthLocked => FailureKind::AuthPermanent,
		ApiError::TokenExpired => FailureKind::TokenExpired,
		ApiError::KeyRejected(_) => FailureKind::KeyRejected,
		ApiError::UnknownRegion(_) | ApiError::InvalidResponse { .. } => FailureKind::Validation,
		ApiError::Http(_) | ApiError::UnexpectedStatus(_) | ApiError::Other(_) => {
			FailureKind::NetTransient
		}
	}
}

pub fn classify_nm(e: &NmError) -> FailureKind {
	match e {
		NmError::NotAuthorized => FailureKind::NotAuthorized,
		NmError::VersionMismatch => FailureKind::VersionMismatch,
		NmError::Shape(_) => FailureKind::Validation,
		NmError::DBus { .. }
		| NmError::Timeout(_)
		| NmError::NotFound(_)
		| NmError::Runtime(_) => FailureKind::DBusTransient,
	}
}
