// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! zbus proxy definitions for the slice of NetworkManager's D-Bus API the
//! gateway consumes. Deliberately narrower than the full NM surface.

use crate::settings::SettingsMap;
use std::collections::HashMap;
use zbus::proxy;
use zvariant::{OwnedObjectPath, OwnedValue};

/// `AddConnection2` / `Update2` flag: persist the profile to disk.
pub const NM_SETTINGS_FLAG_TO_DISK: u32 = 0x1;

/// `Reapply` / `GetAppliedConnection` take no flags today.
pub const NM_DEVICE_FLAG_NONE: u32 = 0;

#[proxy(
	interface = "org.freedesktop.NetworkManager",
	default_service = "org.freedesktop.NetworkManager",
	default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NetworkManager {
	#[zbus(property)]
	fn active_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[proxy(
	interface = "org.freedesktop.NetworkManager.Settings",
	default_service = "org.freedesktop.NetworkManager",
	default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait Settings {
	fn get_connection_by_uuid(&self, uuid: &str) -> zbus::Result<OwnedObjectPath>;

	fn add_connection2(
		&self,
		settings: &SettingsMap,
		flags: u32,
		args: &HashMap<String, OwnedValue>,
	) -> zbus::Result<(OwnedObjectPath, HashMap<String, OwnedValue>)>;
}

#[proxy(
	interface = "org.freedesktop.NetworkManager.Settings.Connection",
	default_service = "org.freedesktop.NetworkManager"
)]
pub trait SettingsConnection {
	fn update2(
		&self,
		settings: &SettingsMap,
		flags: u32,
		args: &HashMap<String, OwnedValue>,
	) -> zbus::Result<HashMap<String, OwnedValue>>;

	fn get_settings(&self) -> zbus::Result<SettingsMap>;

	fn delete(&self) -> zbus::Result<()>;
}

#[proxy(
	interface = "org.freedesktop.NetworkManager.Connection.Active",
	default_service = "org.freedesktop.NetworkManager"
)]
pub trait ActiveConnection {
	#[zbus(property)]
	fn uuid(&self) -> zbus::Result<String>;

	#[zbus(property)]
	fn devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[proxy(
	interface = "org.freedesktop.NetworkManager.Device",
	default_service = "org.freedesktop.NetworkManager"
)]
pub trait Device {
	/// Returns the applied configuration plus the monotonically increasing
	/// version id NM uses as the reapply CAS token.
	fn get_applied_connection(&self, flags: u32) -> zbus::Result<(SettingsMap, u64)>;

	fn reapply(
		&self,
		connection: &SettingsMap,
		version_id: u64,
		flags: u32,
	) -> zbus::Result<()>;
}
