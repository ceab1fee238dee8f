// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::wiring::App;
use anyhow::Context;
use console::style;
use pia_api::{PiaClient, RegionId};
use pia_netmgr::{connection_uuid, NmGateway};
use pia_wg::KeyStore;
use tracing::{instrument, warn};

#[instrument]
pub async fn list(port_forwarding_only: bool) -> anyhow::Result<i32> {
	let client = PiaClient::new()?;
	let mut regions = client
		.list_regions()
		.await
		.context("could not fetch the PIA region list")?;
	regions.sort_by(|a, b| a.id.cmp(&b.id));

	println!("{:<24} {:<28} {}", "ID", "NAME", "PORT FORWARDING");
	for region in regions {
		if port_forwarding_only && !region.port_forwarding {
			continue;
		}
		let pf = if region.port_forwarding { "yes" } else { "no" };
		println!("{:<24} {:<28} {}", region.id.to_string(), region.label, pf);
	}
	Ok(0)
}

#[instrument]
pub async fn add(region: &str) -> anyhow::Result<i32> {
	let app = App::new()?;
	let region: RegionId = region
		.parse()
		.map_err(|e| anyhow::anyhow!("invalid region id '{region}': {e}"))?;

	// Only accept regions PIA actually offers with WireGuard servers.
	let client = PiaClient::new()?;
	let offered = client
		.list_regions()
		.await
		.context("could not fetch the PIA region list")?;
	let descriptor = offered
		.iter()
		.find(|r| r.id == region)
		.with_context(|| format!("region '{region}' is not offered by PIA"))?;
	anyhow::ensure!(
		!descriptor.wg_servers.is_empty(),
		"region '{region}' has no WireGuard servers"
	);

	app.config_store.add_region(&region)?;

	println!(
		"{} Added {} ({})",
		style("✓").green().bold(),
		style(region.to_string()).cyan(),
		descriptor.label
	);
	println!("  Provision it with {}.", style("pia-nm refresh").cyan());
	Ok(0)
}

#[instrument]
pub async fn remove(region: &str) -> anyhow::Result<i32> {
	let app = App::new()?;
	let region: RegionId = region
		.parse()
		.map_err(|e| anyhow::anyhow!("invalid region id '{region}': {e}"))?;

	// Best effort: the saved profile and key material go first; the config
	// entry is removed last so a failed cleanup can be retried.
	match NmGateway::system() {
		Ok(gateway) => match gateway.find_by_uuid(connection_uuid(&region)).await {
			Ok(Some(saved)) => {
				gateway
					.delete_saved(&saved)
					.await
					.context("failed to delete the NM profile")?;
				println!("{} Deleted NM profile", style("✓").green());
			}
			Ok(None) => {}
			Err(e) => warn!(error = %e, "could not query NM for the saved profile"),
		},
		Err(e) => warn!(error = %e, "NetworkManager unreachable, leaving any profile behind"),
	}

	let keys = KeyStore::new(app.config_store.keys_dir());
	keys.delete(region.as_str())
		.await
		.context("failed to delete key material")?;

	app.config_store.remove_region(&region)?;

	println!(
		"{} Removed {}",
		style("✓").green().bold(),
		style(region.to_string()).cyan()
	);
	Ok(0)
}
