// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-region refresh state machine.
//!
//! One refresh walks authenticate → key load/rotate → register → build →
//! NM-reconcile, holding the region's async mutex throughout so at most one
//! refresh is in flight per region. Every retry in here fires exactly once,
//! immediately; the 12-hour scheduler supplies the macro back-off.

use crate::cancel::CancellationToken;
use crate::error::{classify_api, classify_nm, FailureKind, RefreshError};
use crate::seams::{Gateway, Keys, Provider};
use chrono::{DateTime, Utc};
use pia_api::{AccountPassword, ApiError, AuthToken, ConnectionDetails, RegionId};
use pia_netmgr::settings::apply_refresh;
use pia_netmgr::{NmError, ProfileBuilder, RegionProfile};
use pia_wg::WgPrivateKey;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Default horizon after which a keypair is rotated even if the provider
/// still accepts it.
pub const DEFAULT_ROTATION_HORIZON: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionState {
	Idle,
	Refreshing {
		started_at: DateTime<Utc>,
	},
	Failed {
		kind: FailureKind,
		at: DateTime<Utc>,
		attempts: u32,
	},
	Healthy {
		last_refresh: DateTime<Utc>,
	},
}

/// A successful refresh. `saved_update_failed` carries the kind of a
/// best-effort saved-profile update failure that followed a successful
/// reapply; the cycle itself still counts as a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
	pub saved_update_failed: Option<FailureKind>,
}

pub struct RefreshController {
	provider: Arc<dyn Provider>,
	keys: Arc<dyn Keys>,
	gateway: Arc<dyn Gateway>,
	builder: ProfileBuilder,
	rotation_horizon: Duration,
	locks: Mutex<HashMap<RegionId, Arc<Mutex<()>>>>,
	states: StdMutex<HashMap<RegionId, RegionState>>,
}

impl RefreshController {
	pub fn new(
		provider: Arc<dyn Provider>,
		keys: Arc<dyn Keys>,
		gateway: Arc<dyn Gateway>,
		builder: ProfileBuilder,
	) -> Self {
		Self {
			provider,
			keys,
			gateway,
			builder,
			rotation_horizon: DEFAULT_ROTATION_HORIZON,
			locks: Mutex::new(HashMap::new()),
			states: StdMutex::new(HashMap::new()),
		}
	}

	pub fn with_rotation_horizon(mut self, horizon: Duration) -> Self {
		self.rotation_horizon = horizon;
		self
	}

	/// Current in-memory state for a region.
	pub fn state(&self, region: &RegionId) -> RegionState {
		self.states
			.lock()
			.map(|states| states.get(region).cloned())
			.ok()
			.flatten()
			.unwrap_or(RegionState::Idle)
	}

	fn set_state(&self, region: &RegionId, state: RegionState) {
		if let Ok(mut states) = self.states.lock() {
			states.insert(region.clone(), state);
		}
	}

	fn failed_attempts(&self, region: &RegionId) -> u32 {
		match self.state(region) {
			RegionState::Failed { attempts, .. } => attempts,
			_ => 0,
		}
	}

	async fn lock_for(&self, region: &RegionId) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock().await;
		Arc::clone(
			locks
				.entry(region.clone())
				.or_insert_with(|| Arc::new(Mutex::new(()))),
		)
	}

	/// Run one refresh for a region. Serialized per region; refreshes of
	/// distinct regions may run concurrently.
	#[instrument(skip(self, username, password, cancel), fields(region = %region))]
	pub async fn refresh(
		&self,
		region: &RegionId,
		username: &str,
		password: &AccountPassword,
		cancel: &CancellationToken,
	) -> Result<RefreshOutcome, RefreshError> {
		let lock = self.lock_for(region).await;
		let _guard = lock.lock().await;

		let prior_attempts = self.failed_attempts(region);
		self.set_state(
			region,
			RegionState::Refreshing {
				started_at: Utc::now(),
			},
		);

		let result = self.refresh_inner(region, username, password, cancel).await;

		match &result {
			Ok(outcome) => {
				self.set_state(
					region,
					RegionState::Healthy {
						last_refresh: Utc::now(),
					},
				);
				info!(
					region = %region,
					saved_update_failed = outcome.saved_update_failed.is_some(),
					"refresh complete"
				);
			}
			Err(e) => {
				self.set_state(
					region,
					RegionState::Failed {
						kind: e.kind,
						at: Utc::now(),
						attempts: prior_attempts + 1,
					},
				);
				warn!(region = %region, kind = %e.kind, error = %e, "refresh failed");
			}
		}

		result
	}

	async fn refresh_inner(
		&self,
		region: &RegionId,
		username: &str,
		password: &AccountPassword,
		cancel: &CancellationToken,
	) -> Result<RefreshOutcome, RefreshError> {
		ensure_live(region, "authenticate", cancel)?;
		let mut token = self.authenticate(region, username, password).await?;

		ensure_live(region, "load_key", cancel)?;
		let mut keypair = self
			.keys
			.load_or_create(region)
			.await
			.map_err(|e| RefreshError::new(region, "load_key", FailureKind::Io, e.to_string()))?;

		let age = self
			.keys
			.age(region)
			.await
			.map_err(|e| RefreshError::new(region, "key_age", FailureKind::Io, e.to_string()))?;
		if age > self.rotation_horizon {
			info!(region = %region, age_days = age.as_secs() / 86_400, "keypair past rotation horizon");
			keypair = self.rotate(region).await?;
		}

		let details = self
			.register(region, &mut token, &mut keypair, username, password, cancel)
			.await?;

		let profile = self.builder.build(region, &keypair, &details).map_err(|e| {
			RefreshError::new(region, "build_profile", FailureKind::Validation, e.to_string())
		})?;

		let saved_update_failed = self.reconcile(region, &profile, cancel).await?;
		Ok(RefreshOutcome { saved_update_failed })
	}

	async fn authenticate(
		&self,
		region: &RegionId,
		username: &str,
		password: &AccountPassword,
	) -> Result<AuthToken, RefreshError> {
		self.provider
			.authenticate(username, password)
			.await
			.map_err(|e| RefreshError::new(region, "authenticate", classify_api(&e), e.to_string()))
	}

	async fn rotate(&self, region: &RegionId) -> Result<WgPrivateKey, RefreshError> {
		self.keys
			.rotate(region)
			.await
			.map_err(|e| RefreshError::new(region, "rotate_key", FailureKind::Io, e.to_string()))
	}

	/// Register the public key, with the two exactly-once recovery paths: a
	/// re-authentication after the first token rejection, and a key
	/// rotation after the first key rejection.
	async fn register(
		&self,
		region: &RegionId,
		token: &mut AuthToken,
		keypair: &mut WgPrivateKey,
		username: &str,
		password: &AccountPassword,
		cancel: &CancellationToken,
	) -> Result<ConnectionDetails, RefreshError> {
		let mut reauthenticated = false;
		let mut rotated = false;

		loop {
			ensure_live(region, "register_key", cancel)?;
			match self
				.provider
				.register_key(token, region, &keypair.public_key())
				.await
			{
				Ok(details) => return Ok(details),
				Err(ApiError::TokenExpired) if !reauthenticated => {
					reauthenticated = true;
					warn!(region = %region, "token rejected, re-authenticating");
					ensure_live(region, "authenticate", cancel)?;
					*token = self.authenticate(region, username, password).await?;
				}
				Err(ApiError::TokenExpired) => {
					return Err(RefreshError::new(
						region,
						"register_key",
						FailureKind::AuthPermanent,
						"token rejected again after re-authentication",
					));
				}
				Err(ApiError::KeyRejected(status)) if !rotated => {
					rotated = true;
					warn!(region = %region, status = %status, "public key rejected, rotating");
					ensure_live(region, "rotate_key", cancel)?;
					*keypair = self.rotate(region).await?;
				}
				Err(e @ ApiError::KeyRejected(_)) => {
					return Err(RefreshError::new(
						region,
						"register_key",
						FailureKind::KeyRejected,
						e.to_string(),
					));
				}
				Err(e) => {
					return Err(RefreshError::new(
						region,
						"register_key",
						classify_api(&e),
						e.to_string(),
					));
				}
			}
		}
	}

	/// Reconcile the fresh profile against NM: create the saved profile if
	/// missing, rewrite it if the region is inactive, or hot-swap the
	/// applied configuration and then persist.
	async fn reconcile(
		&self,
		region: &RegionId,
		profile: &RegionProfile,
		cancel: &CancellationToken,
	) -> Result<Option<FailureKind>, RefreshError> {
		let saved = nm_call(region, "find_by_uuid", || {
			self.gateway.find_by_uuid(profile.uuid)
		})
		.await?;

		let Some(saved) = saved else {
			ensure_live(region, "add_saved", cancel)?;
			nm_call(region, "add_saved", || self.gateway.add_saved(profile)).await?;
			info!(region = %region, uuid = %profile.uuid, "provisioned saved profile");
			return Ok(None);
		};

		let active = nm_call(region, "find_active_for", || {
			self.gateway.find_active_for(profile.uuid)
		})
		.await?;

		let Some(active) = active else {
			ensure_live(region, "update_saved", cancel)?;
			nm_call(region, "update_saved", || {
				self.gateway.update_saved(&saved, profile)
			})
			.await?;
			info!(region = %region, uuid = %profile.uuid, "updated saved profile (inactive)");
			return Ok(None);
		};

		ensure_live(region, "get_applied", cancel)?;
		let (mut applied, version_id) = nm_call(region, "get_applied", || {
			self.gateway.get_applied(&active.device)
		})
		.await?;

		apply_refresh(&mut applied, profile).map_err(|e| {
			RefreshError::new(region, "apply_refresh", FailureKind::Validation, e.to_string())
		})?;

		// Cancellation is allowed up to here; a reapply that has been
		// issued always runs to completion.
		ensure_live(region, "reapply", cancel)?;

		let first_reapply = nm_call(region, "reapply", || {
			self.gateway.reapply(&active.device, &applied, version_id)
		})
		.await;

		match first_reapply {
			Ok(()) => {}
			Err(e) if e.kind == FailureKind::VersionMismatch => {
				warn!(region = %region, version_id, "stale version id, refetching applied configuration");
				let (mut refetched, fresh_id) = nm_call(region, "get_applied", || {
					self.gateway.get_applied(&active.device)
				})
				.await?;
				apply_refresh(&mut refetched, profile).map_err(|e| {
					RefreshError::new(
						region,
						"apply_refresh",
						FailureKind::Validation,
						e.to_string(),
					)
				})?;
				self.gateway
					.reapply(&active.device, &refetched, fresh_id)
					.await
					.map_err(|e| {
						RefreshError::new(region, "reapply", classify_nm(&e), e.to_string())
					})?;
			}
			Err(e) => return Err(e),
		}

		info!(region = %region, "live configuration reapplied without interruption");

		// Persist the same credentials so a future reconnect matches the
		// running tunnel. Best effort: the live refresh already succeeded.
		match nm_call(region, "update_saved", || {
			self.gateway.update_saved(&saved, profile)
		})
		.await
		{
			Ok(()) => Ok(None),
			Err(e) => {
				warn!(region = %region, error = %e, "saved-profile update failed after successful reapply");
				Ok(Some(e.kind))
			}
		}
	}
}

fn ensure_live(
	region: &RegionId,
	operation: &'static str,
	cancel: &CancellationToken,
) -> Result<(), RefreshError> {
	if cancel.is_cancelled() {
		return Err(RefreshError::new(
			region,
			operation,
			FailureKind::Cancelled,
			"refresh cancelled",
		));
	}
	Ok(())
}

/// Run a gateway call, retrying exactly once immediately when it fails at
/// the D-Bus transport level.
async fn nm_call<T, F, Fut>(
	region: &RegionId,
	operation: &'static str,
	f: F,
) -> Result<T, RefreshError>
where
	F: Fn() -> Fut,
	Fut: Future<Output = Result<T, NmError>>,
{
	match f().await {
		Ok(value) => Ok(value),
		Err(e) if classify_nm(&e) == FailureKind::DBusTransient => {
			warn!(region = %region, operation, error = %e, "transient D-Bus failure, retrying once");
			f().await
				.map_err(|e| RefreshError::new(region, operation, classify_nm(&e), e.to_string()))
		}
		Err(e) => Err(RefreshError::new(
			region,
			operation,
			classify_nm(&e),
			e.to_string(),
		)),
	}
}
