// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Trait seams the controller drives. Production wires these to the
//! concrete provider client, key store, and NM gateway; tests script them.

use async_trait::async_trait;
use pia_api::{AccountPassword, ApiError, AuthToken, ConnectionDetails, RegionId};
use pia_netmgr::gateway::{ActiveBinding, SavedConnection};
use pia_netmgr::settings::AppliedConfig;
use pia_netmgr::{NmError, RegionProfile};
use pia_wg::{KeyStoreError, WgPrivateKey, WgPublicKey};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use zvariant::OwnedObjectPath;

#[async_trait]
pub trait Provider: Send + Sync {
	async fn authenticate(
		&self,
		username: &str,
		password: &AccountPassword,
	) -> Result<AuthToken, ApiError>;

	async fn register_key(
		&self,
		token: &AuthToken,
		region: &RegionId,
		public_key: &WgPublicKey,
	) -> Result<ConnectionDetails, ApiError>;
}

#[async_trait]
pub trait Keys: Send + Sync {
	async fn load_or_create(&self, region: &RegionId) -> Result<WgPrivateKey, KeyStoreError>;
	async fn rotate(&self, region: &RegionId) -> Result<WgPrivateKey, KeyStoreError>;
	async fn age(&self, region: &RegionId) -> Result<Duration, KeyStoreError>;
}

#[async_trait]
pub trait Gateway: Send + Sync {
	async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<SavedConnection>, NmError>;
	async fn add_saved(&self, profile: &RegionProfile) -> Result<SavedConnection, NmError>;
	async fn update_saved(
		&self,
		conn: &SavedConnection,
		profile: &RegionProfile,
	) -> Result<(), NmError>;
	async fn find_active_for(&self, uuid: Uuid) -> Result<Option<ActiveBinding>, NmError>;
	async fn get_applied(
		&self,
		device: &OwnedObjectPath,
	) -> Result<(AppliedConfig, u64), NmError>;
	async fn reapply(
		&self,
		device: &OwnedObjectPath,
		applied: &AppliedConfig,
		version_id: u64,
	) -> Result<(), NmError>;
}

#[derive(Error, Debug)]
pub enum CredentialError {
	#[error("credentials not configured; run 'pia-nm setup' first")]
	NotConfigured,
}

/// Account credentials, read once per refresh cycle and held only for its
/// duration.
pub trait CredentialSource: Send + Sync {
	fn get(&self) -> Result<(String, AccountPassword), CredentialError>;
}
