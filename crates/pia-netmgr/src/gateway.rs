// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed, narrow surface over NetworkManager's D-Bus API. Every call runs
//! on the event-loop thread and is bridged back through a completion
//! handle; the gateway itself holds no state besides the loop handle.

use crate::error::{classify, NmError, Result};
use crate::profile::RegionProfile;
use crate::proxies::{
	ActiveConnectionProxy, DeviceProxy, NetworkManagerProxy, SettingsConnectionProxy,
	SettingsProxy, NM_DEVICE_FLAG_NONE, NM_SETTINGS_FLAG_TO_DISK,
};
use crate::runtime::{LoopRuntime, RuntimeError};
use crate::settings::{profile_to_settings, AppliedConfig, SettingsMap};
use std::collections::HashMap;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;
use zbus::proxy::CacheProperties;
use zbus::Connection;
use zvariant::OwnedObjectPath;

/// Per-call deadline for D-Bus operations.
const DBUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a saved NM profile.
#[derive(Debug, Clone)]
pub struct SavedConnection {
	pub uuid: Uuid,
	pub path: OwnedObjectPath,
}

/// A currently-active connection for a profile. Discovered fresh on every
/// refresh; the version id it leads to is only valid until the next
/// reapply, so bindings are never cached across cycles.
#[derive(Debug, Clone)]
pub struct ActiveBinding {
	pub uuid: Uuid,
	pub device: OwnedObjectPath,
}

static NM_RUNTIME: OnceLock<std::result::Result<LoopRuntime<Connection>, RuntimeError>> =
	OnceLock::new();

fn nm_runtime() -> Result<LoopRuntime<Connection>> {
	let runtime = NM_RUNTIME.get_or_init(|| {
		LoopRuntime::start("pia-nm-dbus", || async {
			Connection::system()
				.await
				.map_err(|e| RuntimeError::Init(e.to_string()))
		})
	});
	match runtime {
		Ok(rt) => Ok(rt.clone()),
		Err(e) => Err(NmError::Runtime(e.clone())),
	}
}

async fn with_timeout<T>(
	operation: &'static str,
	fut: impl Future<Output = Result<T>>,
) -> Result<T> {
	match tokio::time::timeout(DBUS_TIMEOUT, fut).await {
		Ok(result) => result,
		Err(_) => Err(NmError::Timeout(operation)),
	}
}

pub struct NmGateway {
	runtime: LoopRuntime<Connection>,
}

impl NmGateway {
	/// Gateway over the system bus. The event-loop thread and NM client are
	/// process-wide and started lazily on first use.
	pub fn system() -> Result<Self> {
		Ok(Self {
			runtime: nm_runtime()?,
		})
	}

	/// Gateway over an explicit loop runtime (tests, session bus).
	pub fn with_runtime(runtime: LoopRuntime<Connection>) -> Self {
		Self { runtime }
	}

	#[instrument(skip(self))]
	pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<SavedConnection>> {
		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("find_by_uuid", async {
				let settings = SettingsProxy::new(&conn)
					.await
					.map_err(|e| classify(e, "find_by_uuid"))?;
				match settings.get_connection_by_uuid(&uuid.to_string()).await {
					Ok(path) => Ok(Some(SavedConnection { uuid, path })),
					Err(e) => match classify(e, "find_by_uuid") {
						NmError::NotFound(_) => Ok(None),
						other => Err(other),
					},
				}
			})
			.await
		});
		handle.wait().await?
	}

	/// Create the saved profile. Used once per region, at first provision.
	#[instrument(skip(self, profile), fields(region = %profile.region))]
	pub async fn add_saved(&self, profile: &RegionProfile) -> Result<SavedConnection> {
		let uuid = profile.uuid;
		let settings_map = profile_to_settings(profile)?;

		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("add_saved", async {
				let settings = SettingsProxy::new(&conn)
					.await
					.map_err(|e| classify(e, "add_saved"))?;
				let (path, _result) = settings
					.add_connection2(&settings_map, NM_SETTINGS_FLAG_TO_DISK, &HashMap::new())
					.await
					.map_err(|e| classify(e, "add_saved"))?;
				Ok(SavedConnection { uuid, path })
			})
			.await
		});

		let saved = handle.wait().await??;
		debug!(uuid = %saved.uuid, path = %saved.path, "saved connection added");
		Ok(saved)
	}

	/// Idempotent rewrite of the saved profile.
	#[instrument(skip(self, conn, profile), fields(uuid = %conn.uuid))]
	pub async fn update_saved(
		&self,
		conn: &SavedConnection,
		profile: &RegionProfile,
	) -> Result<()> {
		let path = conn.path.clone();
		let settings_map = profile_to_settings(profile)?;

		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("update_saved", async {
				let proxy = SettingsConnectionProxy::builder(&conn)
					.path(path)
					.map_err(|e| classify(e, "update_saved"))?
					.build()
					.await
					.map_err(|e| classify(e, "update_saved"))?;
				proxy
					.update2(&settings_map, NM_SETTINGS_FLAG_TO_DISK, &HashMap::new())
					.await
					.map_err(|e| classify(e, "update_saved"))?;
				Ok(())
			})
			.await
		});
		handle.wait().await?
	}

	/// Remove the saved profile entirely (region removal).
	#[instrument(skip(self, conn), fields(uuid = %conn.uuid))]
	pub async fn delete_saved(&self, conn: &SavedConnection) -> Result<()> {
		let path = conn.path.clone();

		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("delete_saved", async {
				let proxy = SettingsConnectionProxy::builder(&conn)
					.path(path)
					.map_err(|e| classify(e, "delete_saved"))?
					.build()
					.await
					.map_err(|e| classify(e, "delete_saved"))?;
				proxy
					.delete()
					.await
					.map_err(|e| classify(e, "delete_saved"))?;
				Ok(())
			})
			.await
		});
		handle.wait().await?
	}

	/// Look for an active connection bound to the profile's UUID and return
	/// its device.
	#[instrument(skip(self))]
	pub async fn find_active_for(&self, uuid: Uuid) -> Result<Option<ActiveBinding>> {
		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("find_active_for", async {
				let nm = NetworkManagerProxy::builder(&conn)
					.cache_properties(CacheProperties::No)
					.build()
					.await
					.map_err(|e| classify(e, "find_active_for"))?;

				let wanted = uuid.to_string();
				for path in nm
					.active_connections()
					.await
					.map_err(|e| classify(e, "find_active_for"))?
				{
					let active = match ActiveConnectionProxy::builder(&conn)
						.path(path)
						.map_err(|e| classify(e, "find_active_for"))?
						.cache_properties(CacheProperties::No)
						.build()
						.await
					{
						Ok(proxy) => proxy,
						// The connection may have deactivated between the
						// listing and this lookup.
						Err(_) => continue,
					};

					let Ok(active_uuid) = active.uuid().await else {
						continue;
					};
					if active_uuid != wanted {
						continue;
					}

					let devices = active
						.devices()
						.await
						.map_err(|e| classify(e, "find_active_for"))?;
					if let Some(device) = devices.into_iter().next() {
						return Ok(Some(ActiveBinding { uuid, device }));
					}
				}
				Ok(None)
			})
			.await
		});
		handle.wait().await?
	}

	/// Fetch the running configuration plus its version id (the reapply CAS
	/// token).
	#[instrument(skip(self, device))]
	pub async fn get_applied(
		&self,
		device: &OwnedObjectPath,
	) -> Result<(AppliedConfig, u64)> {
		let device = device.clone();

		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("get_applied", async {
				let proxy = DeviceProxy::builder(&conn)
					.path(device)
					.map_err(|e| classify(e, "get_applied"))?
					.build()
					.await
					.map_err(|e| classify(e, "get_applied"))?;
				let (settings, version_id): (SettingsMap, u64) = proxy
					.get_applied_connection(NM_DEVICE_FLAG_NONE)
					.await
					.map_err(|e| classify(e, "get_applied"))?;
				Ok((AppliedConfig(settings), version_id))
			})
			.await
		});
		handle.wait().await?
	}

	/// Hot-swap the running configuration. NM rejects the call with a
	/// version-id mismatch if the applied configuration changed since
	/// `version_id` was read.
	#[instrument(skip(self, device, applied))]
	pub async fn reapply(
		&self,
		device: &OwnedObjectPath,
		applied: &AppliedConfig,
		version_id: u64,
	) -> Result<()> {
		let device = device.clone();
		let settings_map = applied.0.clone();

		let handle = self.runtime.submit(move |conn| async move {
			with_timeout("reapply", async {
				let proxy = DeviceProxy::builder(&conn)
					.path(device)
					.map_err(|e| classify(e, "reapply"))?
					.build()
					.await
					.map_err(|e| classify(e, "reapply"))?;
				proxy
					.reapply(&settings_map, version_id, NM_DEVICE_FLAG_NONE)
					.await
					.map_err(|e| classify(e, "reapply"))?;
				Ok(())
			})
			.await
		});

		handle.wait().await??;
		debug!(version_id, "reapply accepted");
		Ok(())
	}
}
