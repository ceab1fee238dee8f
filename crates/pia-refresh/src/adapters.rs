// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Seam implementations over the concrete components.

use crate::seams::{Gateway, Keys, Provider};
use async_trait::async_trait;
use pia_api::{AccountPassword, ApiError, AuthToken, ConnectionDetails, PiaClient, RegionId};
use pia_netmgr::gateway::{ActiveBinding, NmGateway, SavedConnection};
use pia_netmgr::settings::AppliedConfig;
use pia_netmgr::{NmError, RegionProfile};
use pia_wg::{KeyStore, KeyStoreError, WgPrivateKey, WgPublicKey};
use std::time::Duration;
use uuid::Uuid;
use zvariant::OwnedObjectPath;

#[async_trait]
impl Provider for PiaClient {
	async fn authenticate(
		&self,
		username: &str,
		password: &AccountPassword,
	) -> Result<AuthToken, ApiError> {
		PiaClient::authenticate(self, username, password).await
	}

	async fn register_key(
		&self,
		token: &AuthToken,
		region: &RegionId,
		public_key: &WgPublicKey,
	) -> Result<ConnectionDetails, ApiError> {
		PiaClient::register_key(self, token, region, public_key).await
	}
}

#[async_trait]
impl Keys for KeyStore {
	async fn load_or_create(&self, region: &RegionId) -> Result<WgPrivateKey, KeyStoreError> {
		KeyStore::load_or_create(self, region.as_str()).await
	}

	async fn rotate(&self, region: &RegionId) -> Result<WgPrivateKey, KeyStoreError> {
		KeyStore::rotate(self, region.as_str()).await
	}

	async fn age(&self, region: &RegionId) -> Result<Duration, KeyStoreError> {
		KeyStore::age(self, region.as_str()).await
	}
}

#[async_trait]
impl Gateway for NmGateway {
	async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<SavedConnection>, NmError> {
		NmGateway::find_by_uuid(self, uuid).await
	}

	async fn add_saved(&self, profile: &RegionProfile) -> Result<SavedConnection, NmError> {
		NmGateway::add_saved(self, profile).await
	}

	async fn update_saved(
		&self,
		conn: &SavedConnection,
		profile: &RegionProfile,
	) -> Result<(), NmError> {
		NmGateway::update_saved(self, conn, profile).await
	}

	async fn find_active_for(&self, uuid: Uuid) -> Result<Option<ActiveBinding>, NmError> {
		NmGateway::find_active_for(self, uuid).await
	}

	async fn get_applied(
		&self,
		device: &OwnedObjectPath,
	) -> Result<(AppliedConfig, u64), NmError> {
		NmGateway::get_applied(self, device).await
	}

	async fn reapply(
		&self,
		device: &OwnedObjectPath,
		applied: &AppliedConfig,
		version_id: u64,
	) -> Result<(), NmError> {
		NmGateway::reapply(self, device, applied, version_id).await
	}
}
