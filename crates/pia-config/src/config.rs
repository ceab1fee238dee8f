// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use pia_api::RegionId;
use pia_netmgr::{Ipv6Mode, Preferences, SplitTunnel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

const CONFIG_FILE: &str = "config.yaml";
const CONFIG_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read or write configuration: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid YAML in configuration file: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error("region '{0}' is already configured")]
	DuplicateRegion(RegionId),

	#[error("region '{0}' is not configured")]
	UnknownRegion(RegionId),

	#[error("unsupported configuration version {0}")]
	UnsupportedVersion(u32),

	#[error("cannot determine the user configuration directory")]
	NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesFile {
	pub dns: bool,
	pub ipv6: bool,
	pub split_tunnel: bool,
}

impl Default for PreferencesFile {
	fn default() -> Self {
		Self {
			dns: true,
			ipv6: false,
			split_tunnel: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
	pub version: u32,
	#[serde(default)]
	pub last_refresh: Option<DateTime<Utc>>,
}

impl Default for Metadata {
	fn default() -> Self {
		Self {
			version: CONFIG_VERSION,
			last_refresh: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub regions: Vec<RegionId>,
	#[serde(default)]
	pub preferences: PreferencesFile,
	#[serde(default)]
	pub metadata: Metadata,
}

impl Config {
	/// Map the persisted booleans onto the profile-builder preferences.
	pub fn preferences(&self) -> Preferences {
		Preferences {
			use_vpn_dns: self.preferences.dns,
			ipv6: if self.preferences.ipv6 {
				Ipv6Mode::Auto
			} else {
				Ipv6Mode::Disabled
			},
			split_tunnel: if self.preferences.split_tunnel {
				SplitTunnel::ExcludeRfc1918
			} else {
				SplitTunnel::Off
			},
			..Preferences::default()
		}
	}
}

/// Reader/writer for `config.yaml` under the user configuration directory.
/// The directory is 0700, the file 0600, and saves go through a sibling
/// temp file plus rename.
pub struct ConfigStore {
	path: PathBuf,
}

impl ConfigStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Store at the default location, `~/.config/pia-nm/config.yaml`.
	pub fn default_location() -> Result<Self> {
		Ok(Self::new(default_config_dir()?.join(CONFIG_FILE)))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Directory holding the per-region key files.
	pub fn keys_dir(&self) -> PathBuf {
		self.path
			.parent()
			.unwrap_or_else(|| Path::new("."))
			.join("keys")
	}

	#[instrument(skip(self))]
	pub fn load(&self) -> Result<Config> {
		if !self.path.exists() {
			info!(path = %self.path.display(), "no configuration yet, starting from defaults");
			let config = Config::default();
			self.save(&config)?;
			return Ok(config);
		}

		let content = std::fs::read_to_string(&self.path)?;
		let config: Config = serde_yaml::from_str(&content)?;
		if config.metadata.version > CONFIG_VERSION {
			return Err(ConfigError::UnsupportedVersion(config.metadata.version));
		}

		debug!(regions = config.regions.len(), "configuration loaded");
		Ok(config)
	}

	#[instrument(skip(self, config))]
	pub fn save(&self, config: &Config) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
			#[cfg(unix)]
			{
				use std::os::unix::fs::PermissionsExt;
				std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
			}
		}

		let content = serde_yaml::to_string(config)?;
		let temp_path = self.path.with_extension("tmp");
		std::fs::write(&temp_path, content)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
		}

		std::fs::rename(&temp_path, &self.path)?;
		debug!(path = %self.path.display(), "configuration saved");
		Ok(())
	}

	pub fn add_region(&self, region: &RegionId) -> Result<()> {
		let mut config = self.load()?;
		if config.regions.contains(region) {
			return Err(ConfigError::DuplicateRegion(region.clone()));
		}
		config.regions.push(region.clone());
		self.save(&config)?;
		info!(region = %region, "region added");
		Ok(())
	}

	pub fn remove_region(&self, region: &RegionId) -> Result<()> {
		let mut config = self.load()?;
		let before = config.regions.len();
		config.regions.retain(|r| r != region);
		if config.regions.len() == before {
			return Err(ConfigError::UnknownRegion(region.clone()));
		}
		self.save(&config)?;
		info!(region = %region, "region removed");
		Ok(())
	}

	/// Stamp the moment a refresh cycle finished aggregating.
	pub fn set_last_refresh(&self, at: DateTime<Utc>) -> Result<()> {
		let mut config = self.load()?;
		config.metadata.last_refresh = Some(at);
		self.save(&config)
	}
}

/// `~/.config/pia-nm`.
pub fn default_config_dir() -> Result<PathBuf> {
	dirs::config_dir()
		.map(|d| d.join("pia-nm"))
		.ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn store(temp: &TempDir) -> ConfigStore {
		ConfigStore::new(temp.path().join("pia-nm/config.yaml"))
	}

	#[test]
	fn load_bootstraps_defaults() {
		let temp = TempDir::new().unwrap();
		let store = store(&temp);

		let config = store.load().unwrap();

		assert!(config.regions.is_empty());
		assert!(config.preferences.dns);
		assert!(!config.preferences.ipv6);
		assert_eq!(config.metadata.version, 1);
		assert!(config.metadata.last_refresh.is_none());
		assert!(store.path().exists());
	}

	#[test]
	fn roundtrip_preserves_config() {
		let temp = TempDir::new().unwrap();
		let store = store(&temp);

		let mut config = store.load().unwrap();
		config.regions.push("us-east".parse().unwrap());
		config.preferences.split_tunnel = true;
		config.metadata.last_refresh = Some(Utc::now());
		store.save(&config).unwrap();

		let reloaded = store.load().unwrap();
		assert_eq!(config.regions, reloaded.regions);
		assert_eq!(config.preferences, reloaded.preferences);
		assert_eq!(
			config.metadata.last_refresh.map(|t| t.timestamp()),
			reloaded.metadata.last_refresh.map(|t| t.timestamp())
		);
	}

	#[test]
	fn accepts_the_documented_yaml_shape() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("config.yaml");
		std::fs::write(
			&path,
			"regions: [us-east, japan]\npreferences:\n  dns: true\n  ipv6: false\n  split_tunnel: true\nmetadata:\n  version: 1\n  last_refresh: 2025-06-01T10:00:00Z\n",
		)
		.unwrap();

		let config = ConfigStore::new(&path).load().unwrap();
		assert_eq!(config.regions.len(), 2);
		assert!(config.preferences.split_tunnel);
		assert!(config.metadata.last_refresh.is_some());
	}

	#[test]
	fn add_and_remove_region() {
		let temp = TempDir::new().unwrap();
		let store = store(&temp);
		let region: RegionId = "us-east".parse().unwrap();

		store.add_region(&region).unwrap();
		assert!(matches!(
			store.add_region(&region),
			Err(ConfigError::DuplicateRegion(_))
		));

		store.remove_region(&region).unwrap();
		assert!(matches!(
			store.remove_region(&region),
			Err(ConfigError::UnknownRegion(_))
		));
	}

	#[test]
	fn rejects_future_config_version() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("config.yaml");
		std::fs::write(&path, "regions: []\nmetadata:\n  version: 9\n").unwrap();

		assert!(matches!(
			ConfigStore::new(&path).load(),
			Err(ConfigError::UnsupportedVersion(9))
		));
	}

	#[cfg(unix)]
	#[test]
	fn config_file_is_private() {
		use std::os::unix::fs::PermissionsExt;

		let temp = TempDir::new().unwrap();
		let store = store(&temp);
		store.load().unwrap();

		let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, 0o600);

		let dir_mode = std::fs::metadata(store.path().parent().unwrap())
			.unwrap()
			.permissions()
			.mode() & 0o777;
		assert_eq!(dir_mode, 0o700);
	}

	#[test]
	fn preference_booleans_map_to_builder_preferences() {
		let config = Config {
			preferences: PreferencesFile {
				dns: false,
				ipv6: true,
				split_tunnel: true,
			},
			..Config::default()
		};

		let prefs = config.preferences();
		assert!(!prefs.use_vpn_dns);
		assert_eq!(prefs.ipv6, Ipv6Mode::Auto);
		assert_eq!(prefs.split_tunnel, SplitTunnel::ExcludeRfc1918);
		assert_eq!(prefs.keepalive, 25);
	}

	#[test]
	fn keys_dir_is_sibling_of_config() {
		let temp = TempDir::new().unwrap();
		let store = store(&temp);
		assert_eq!(store.keys_dir(), temp.path().join("pia-nm/keys"));
	}
}
