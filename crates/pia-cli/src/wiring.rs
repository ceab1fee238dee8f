// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Component wiring shared by the subcommands.

use anyhow::Context;
use pia_api::AccountPassword;
use pia_config::{ConfigStore, Credentials};
use pia_refresh::{CredentialError, CredentialSource};

pub struct App {
	pub config_store: ConfigStore,
	pub credentials: Credentials,
}

impl App {
	pub fn new() -> anyhow::Result<Self> {
		let config_store =
			ConfigStore::default_location().context("cannot locate configuration directory")?;
		let config_dir = config_store
			.path()
			.parent()
			.map(|p| p.to_path_buf())
			.context("configuration path has no parent directory")?;

		Ok(Self {
			config_store,
			credentials: Credentials::new(config_dir),
		})
	}
}

/// The stored credentials presented through the controller's seam.
pub struct StoredCredentials<'a>(pub &'a Credentials);

impl CredentialSource for StoredCredentials<'_> {
	fn get(&self) -> Result<(String, AccountPassword), CredentialError> {
		self.0.get().map_err(|_| CredentialError::NotConfigured)
	}
}

/// Name of the invoking user, written into profile permissions so later
/// non-privileged updates pass PolicyKit.
pub fn current_username() -> anyhow::Result<String> {
	std::env::var("USER")
		.or_else(|_| std::env::var("LOGNAME"))
		.context("cannot determine the invoking user (USER/LOGNAME unset)")
}
