// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account credentials in the OS secret store, with a restricted JSON file
//! as the fallback when no keyring is available (headless hosts).

use pia_api::AccountPassword;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

const KEYRING_SERVICE: &str = "pia-nm";
const USERNAME_ENTRY: &str = "username";
const PASSWORD_ENTRY: &str = "password";
const FALLBACK_FILE: &str = "credentials.json";

#[derive(Error, Debug)]
pub enum CredentialsError {
	#[error("credentials not configured")]
	NotConfigured,

	#[error("secret store failure: {0}")]
	Backend(String),

	#[error("credential file I/O failed: {0}")]
	Io(#[from] std::io::Error),

	#[error("credential file is malformed")]
	Malformed,
}

pub type Result<T> = std::result::Result<T, CredentialsError>;

#[derive(Serialize, Deserialize)]
struct PersistedCredentials {
	username: String,
	password: String,
}

/// Keyring-first credential storage keyed by the `pia-nm` service name.
pub struct Credentials {
	service: String,
	fallback_path: PathBuf,
}

impl Credentials {
	pub fn new(config_dir: impl Into<PathBuf>) -> Self {
		Self {
			service: KEYRING_SERVICE.to_string(),
			fallback_path: config_dir.into().join(FALLBACK_FILE),
		}
	}

	#[cfg(test)]
	fn with_service(mut self, service: impl Into<String>) -> Self {
		self.service = service.into();
		self
	}

	fn entry(&self, name: &str) -> std::result::Result<keyring::Entry, keyring::Error> {
		keyring::Entry::new(&self.service, name)
	}

	/// Read the account credentials. Consulted once per refresh cycle; the
	/// values live in memory only for the cycle's duration.
	pub fn get(&self) -> Result<(String, AccountPassword)> {
		match self.get_from_keyring() {
			Ok(found) => return Ok(found),
			Err(CredentialsError::NotConfigured) => {}
			Err(e) => {
				warn!(error = %e, "keyring unavailable, trying file fallback");
			}
		}
		self.get_from_file()
	}

	fn get_from_keyring(&self) -> Result<(String, AccountPassword)> {
		let read = |name: &str| -> Result<String> {
			match self.entry(name) {
				Ok(entry) => match entry.get_password() {
					Ok(value) => Ok(value),
					Err(keyring::Error::NoEntry) => Err(CredentialsError::NotConfigured),
					Err(e) => Err(CredentialsError::Backend(e.to_string())),
				},
				Err(e) => Err(CredentialsError::Backend(e.to_string())),
			}
		};

		let username = read(USERNAME_ENTRY)?;
		let password = read(PASSWORD_ENTRY)?;
		debug!("credentials read from keyring");
		Ok((username, AccountPassword::new(password)))
	}

	fn get_from_file(&self) -> Result<(String, AccountPassword)> {
		if !self.fallback_path.exists() {
			return Err(CredentialsError::NotConfigured);
		}
		let content = std::fs::read_to_string(&self.fallback_path)?;
		let persisted: PersistedCredentials =
			serde_json::from_str(&content).map_err(|_| CredentialsError::Malformed)?;
		debug!("credentials read from fallback file");
		Ok((persisted.username, AccountPassword::new(persisted.password)))
	}

	/// Store credentials, preferring the keyring and falling back to the
	/// restricted file when the keyring refuses.
	pub fn set(&self, username: &str, password: &AccountPassword) -> Result<()> {
		match self.set_in_keyring(username, password) {
			Ok(()) => {
				info!("credentials stored in system keyring");
				return Ok(());
			}
			Err(e) => {
				warn!(error = %e, "keyring store failed, using file fallback");
			}
		}
		self.set_in_file(username, password)
	}

	fn set_in_keyring(&self, username: &str, password: &AccountPassword) -> Result<()> {
		let write = |name: &str, value: &str| -> Result<()> {
			self.entry(name)
				.and_then(|entry| entry.set_password(value))
				.map_err(|e| CredentialsError::Backend(e.to_string()))
		};
		write(USERNAME_ENTRY, username)?;
		write(PASSWORD_ENTRY, password.expose())
	}

	fn set_in_file(&self, username: &str, password: &AccountPassword) -> Result<()> {
		if let Some(parent) = self.fallback_path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let content = serde_json::to_string_pretty(&PersistedCredentials {
			username: username.to_string(),
			password: password.expose().to_string(),
		})
		.map_err(|_| CredentialsError::Malformed)?;

		let temp_path = self.fallback_path.with_extension("tmp");
		std::fs::write(&temp_path, content)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
		}

		std::fs::rename(&temp_path, &self.fallback_path)?;
		info!(path = %self.fallback_path.display(), "credentials stored in fallback file");
		Ok(())
	}

	/// Drop stored credentials from both backends. Missing entries are not
	/// an error.
	pub fn clear(&self) -> Result<()> {
		for name in [USERNAME_ENTRY, PASSWORD_ENTRY] {
			if let Ok(entry) = self.entry(name) {
				match entry.delete_credential() {
					Ok(()) | Err(keyring::Error::NoEntry) => {}
					Err(e) => warn!(error = %e, "failed to delete keyring entry"),
				}
			}
		}
		match std::fs::remove_file(&self.fallback_path) {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	// Keyring availability varies across test hosts, so these tests pin the
	// store to the file fallback by making the keyring reads miss.
	fn file_only(temp: &TempDir) -> Credentials {
		Credentials::new(temp.path()).with_service("pia-nm-test-nonexistent")
	}

	#[test]
	fn missing_credentials_are_not_configured() {
		let temp = TempDir::new().unwrap();
		let creds = file_only(&temp);

		assert!(matches!(
			creds.get_from_file(),
			Err(CredentialsError::NotConfigured)
		));
	}

	#[test]
	fn file_fallback_roundtrip() {
		let temp = TempDir::new().unwrap();
		let creds = file_only(&temp);

		creds
			.set_in_file("p1234567", &AccountPassword::new("hunter2".to_string()))
			.unwrap();

		let (username, password) = creds.get_from_file().unwrap();
		assert_eq!(username, "p1234567");
		assert_eq!(password.expose(), "hunter2");
	}

	#[cfg(unix)]
	#[test]
	fn fallback_file_is_private() {
		use std::os::unix::fs::PermissionsExt;

		let temp = TempDir::new().unwrap();
		let creds = file_only(&temp);
		creds
			.set_in_file("p1234567", &AccountPassword::new("hunter2".to_string()))
			.unwrap();

		let mode = std::fs::metadata(temp.path().join("credentials.json"))
			.unwrap()
			.permissions()
			.mode() & 0o777;
		assert_eq!(mode, 0o600);
	}

	#[test]
	fn malformed_file_is_reported() {
		let temp = TempDir::new().unwrap();
		let creds = file_only(&temp);
		std::fs::write(temp.path().join("credentials.json"), "not json").unwrap();

		assert!(matches!(
			creds.get_from_file(),
			Err(CredentialsError::Malformed)
		));
	}

	#[test]
	fn clear_tolerates_absent_state() {
		let temp = TempDir::new().unwrap();
		let creds = file_only(&temp);
		creds.clear().unwrap();
	}
}
