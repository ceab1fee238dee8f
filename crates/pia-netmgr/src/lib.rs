// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! NetworkManager integration: the D-Bus event-loop runtime, the typed
//! gateway over NM's object API, and the WireGuard profile builder.

pub mod error;
pub mod gateway;
pub mod profile;
pub mod proxies;
pub mod runtime;
pub mod settings;

pub use error::NmError;
pub use gateway::{ActiveBinding, NmGateway, SavedConnection};
pub use profile::{
	connection_uuid, interface_name, Ipv6Mode, Preferences, ProfileBuilder, RegionProfile,
	SplitTunnel, ValidationError,
};
pub use runtime::{CompletionHandle, LoopRuntime, RuntimeError};
pub use settings::{AppliedConfig, SettingsMap};
