// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{KeyError, WgPrivateKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum KeyStoreError {
	#[error("key file I/O failed: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid key material on disk: {0}")]
	InvalidKey(#[from] KeyError),

	#[error("no keypair for region {0}")]
	NotFound(String),
}

pub type Result<T> = std::result::Result<T, KeyStoreError>;

/// One WireGuard private key per region, persisted under the keys
/// directory.
///
/// Layout: `<keys-dir>/<region>.key` (0600, private key) and
/// `<keys-dir>/<region>.pub` (0644, derived public key). The directory
/// itself is 0700. A key file is either fully written or absent: writers go
/// through a sibling temporary file and an atomic rename.
pub struct KeyStore {
	root: PathBuf,
	locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			locks: Mutex::new(HashMap::new()),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn private_path(&self, region: &str) -> PathBuf {
		self.root.join(format!("{region}.key"))
	}

	fn public_path(&self, region: &str) -> PathBuf {
		self.root.join(format!("{region}.pub"))
	}

	async fn lock_for(&self, region: &str) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock().await;
		Arc::clone(
			locks
				.entry(region.to_string())
				.or_insert_with(|| Arc::new(Mutex::new(()))),
		)
	}

	async fn ensure_root(&self) -> Result<()> {
		fs::create_dir_all(&self.root).await?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700)).await?;
		}

		Ok(())
	}

	/// Return the persisted private key for a region, generating and
	/// persisting a fresh one if none exists yet.
	#[instrument(skip(self))]
	pub async fn load_or_create(&self, region: &str) -> Result<WgPrivateKey> {
		let lock = self.lock_for(region).await;
		let _guard = lock.lock().await;

		let private_path = self.private_path(region);
		if private_path.exists() {
			let content = fs::read_to_string(&private_path).await?;
			let key = WgPrivateKey::from_base64(&content)?;
			debug!(region = %region, "loaded existing key");
			return Ok(key);
		}

		let key = WgPrivateKey::generate();
		self.persist(region, &key).await?;
		info!(region = %region, public_key = %key.public_key(), "generated new key");
		Ok(key)
	}

	/// Unconditionally replace the region's key. The previous private key
	/// file is overwritten by the rename.
	#[instrument(skip(self))]
	pub async fn rotate(&self, region: &str) -> Result<WgPrivateKey> {
		let lock = self.lock_for(region).await;
		let _guard = lock.lock().await;

		let key = WgPrivateKey::generate();
		self.persist(region, &key).await?;
		info!(region = %region, public_key = %key.public_key(), "rotated key");
		Ok(key)
	}

	/// Age of the region's private key, from the key file's modification
	/// time. Feeds the rotation policy.
	#[instrument(skip(self))]
	pub async fn age(&self, region: &str) -> Result<Duration> {
		let private_path = self.private_path(region);
		let metadata = fs::metadata(&private_path)
			.await
			.map_err(|_| KeyStoreError::NotFound(region.to_string()))?;
		let modified = metadata.modified()?;
		Ok(modified.elapsed().unwrap_or(Duration::ZERO))
	}

	/// Remove both key files for a region. Missing files are not an error.
	#[instrument(skip(self))]
	pub async fn delete(&self, region: &str) -> Result<()> {
		let lock = self.lock_for(region).await;
		let _guard = lock.lock().await;

		for path in [self.private_path(region), self.public_path(region)] {
			match fs::remove_file(&path).await {
				Ok(()) => debug!(path = %path.display(), "removed key file"),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			}
		}

		info!(region = %region, "deleted key material");
		Ok(())
	}

	async fn persist(&self, region: &str, key: &WgPrivateKey) -> Result<()> {
		self.ensure_root().await?;

		write_atomic(
			&self.private_path(region),
			format!("{}\n", key.expose_base64()).as_bytes(),
			0o600,
		)
		.await?;

		write_atomic(
			&self.public_path(region),
			format!("{}\n", key.public_key().to_base64()).as_bytes(),
			0o644,
		)
		.await?;

		Ok(())
	}
}

/// Write `contents` to `path` via a sibling temp file plus rename, so the
/// destination is never observed partially written.
async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
	let temp_path = path.with_extension("tmp");

	#[cfg(unix)]
	{
		use tokio::fs::OpenOptions;

		let mut file = OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(mode)
			.open(&temp_path)
			.await?;
		file.write_all(contents).await?;
		file.sync_all().await?;
	}

	#[cfg(not(unix))]
	{
		let _ = mode;
		let mut file = fs::File::create(&temp_path).await?;
		file.write_all(contents).await?;
		file.sync_all().await?;
	}

	fs::rename(&temp_path, path).await?;
	Ok(())
}
