// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::runtime::RuntimeError;
use thiserror::Error;

/// Remediation text attached to PolicyKit denials. Saved profiles must name
/// the invoking user in their permissions list for non-privileged updates.
pub const NOT_AUTHORIZED_HINT: &str =
	"the saved connection is not owned by the invoking user; re-run 'pia-nm setup' to recreate it with user permissions";

#[derive(Error, Debug)]
pub enum NmError {
	/// D-Bus transport failure or call timeout.
	#[error("D-Bus failure during {operation}: {message}")]
	DBus {
		operation: &'static str,
		message: String,
	},

	#[error("not authorized to modify the connection ({NOT_AUTHORIZED_HINT})")]
	NotAuthorized,

	/// Reapply lost the compare-and-swap race on the version id.
	#[error("applied configuration changed underneath reapply (stale version id)")]
	VersionMismatch,

	#[error("connection not found: {0}")]
	NotFound(String),

	#[error("D-Bus call timed out during {0}")]
	Timeout(&'static str),

	#[error("settings serialization failed: {0}")]
	Shape(String),

	#[error(transparent)]
	Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, NmError>;

/// Map a D-Bus method error by name. NM signals PolicyKit denials, stale
/// version ids, and missing connections with dedicated error names.
pub fn classify_method_error(
	name: &str,
	detail: &str,
	operation: &'static str,
) -> NmError {
	if name.ends_with(".VersionIdMismatch") {
		return NmError::VersionMismatch;
	}
	if name.ends_with(".PermissionDenied") || name.ends_with(".NotAuthorized") {
		return NmError::NotAuthorized;
	}
	if name.ends_with(".InvalidConnection")
		|| name.ends_with(".UnknownConnection")
		|| name.ends_with(".NotFound")
	{
		return NmError::NotFound(detail.to_string());
	}
	NmError::DBus {
		operation,
		message: format!("{name}: {detail}"),
	}
}

pub(crate) fn classify(e: zbus::Error, operation: &'static str) -> NmError {
	if let zbus::Error::MethodError(name, detail, _) = &e {
		return classify_method_error(
			name.as_str(),
			detail.as_deref().unwrap_or_default(),
			operation,
		);
	}
	NmError::DBus {
		operation,
		message: e.to_string(),
	}
}
