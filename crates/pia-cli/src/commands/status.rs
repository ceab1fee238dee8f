// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::wiring::App;
use anyhow::Context;
use console::style;
use pia_netmgr::{connection_uuid, NmGateway};
use pia_wg::KeyStore;
use tracing::instrument;

#[instrument]
pub async fn run() -> anyhow::Result<i32> {
	let app = App::new()?;
	let config = app
		.config_store
		.load()
		.context("configuration is unreadable")?;

	if config.regions.is_empty() {
		println!("No regions configured.");
		return Ok(0);
	}

	let gateway = NmGateway::system().ok();
	if gateway.is_none() {
		println!(
			"{} NetworkManager is not reachable; showing local state only",
			style("⚠").yellow()
		);
	}
	let keys = KeyStore::new(app.config_store.keys_dir());

	println!("{:<16} {:<10} {:<8} {}", "REGION", "PROFILE", "ACTIVE", "KEY AGE");
	for region in &config.regions {
		let uuid = connection_uuid(region);

		let (profile, active) = match &gateway {
			Some(gateway) => {
				let saved = gateway.find_by_uuid(uuid).await.unwrap_or(None).is_some();
				let active = if saved {
					gateway.find_active_for(uuid).await.unwrap_or(None).is_some()
				} else {
					false
				};
				(
					if saved { "saved" } else { "missing" },
					if active { "yes" } else { "no" },
				)
			}
			None => ("unknown", "unknown"),
		};

		let key_age = match keys.age(region.as_str()).await {
			Ok(age) => format!("{}d", age.as_secs() / 86_400),
			Err(_) => "no key".to_string(),
		};

		let marker = if active == "yes" {
			style("●").green()
		} else if profile == "saved" {
			style("●").dim()
		} else {
			style("○").red()
		};
		println!(
			"{} {:<14} {:<10} {:<8} {}",
			marker,
			region.to_string(),
			profile,
			active,
			key_age
		);
	}

	match config.metadata.last_refresh {
		Some(at) => println!("\nLast refresh: {}", at.to_rfc3339()),
		None => println!("\nLast refresh: never"),
	}
	Ok(0)
}
