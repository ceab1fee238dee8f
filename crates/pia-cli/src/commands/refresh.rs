// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::wiring::{current_username, App, StoredCredentials};
use anyhow::Context;
use clap::Args;
use console::style;
use pia_api::{PiaClient, RegionId};
use pia_netmgr::{NmGateway, ProfileBuilder};
use pia_refresh::{
	CancellationToken, CredentialSource, Outcome, RefreshController, RefreshOrchestrator,
	RefreshSummary,
};
use pia_wg::KeyStore;
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Debug, Args)]
pub struct RefreshArgs {
	/// Refresh a single region instead of all configured ones
	#[arg(long)]
	pub region: Option<String>,
}

#[instrument(skip_all)]
pub async fn run(args: RefreshArgs) -> anyhow::Result<i32> {
	let app = App::new()?;
	let config = app
		.config_store
		.load()
		.context("configuration is unreadable")?;

	let regions: Vec<RegionId> = match &args.region {
		Some(wanted) => {
			let region: RegionId = wanted
				.parse()
				.map_err(|e| anyhow::anyhow!("invalid region id '{wanted}': {e}"))?;
			anyhow::ensure!(
				config.regions.contains(&region),
				"region '{region}' is not configured; add it with 'pia-nm add-region'"
			);
			vec![region]
		}
		None => config.regions.clone(),
	};

	if regions.is_empty() {
		println!(
			"No regions configured. Add one with {}.",
			style("pia-nm add-region <id>").cyan()
		);
		return Ok(0);
	}

	// Credentials are read once per cycle and held only for its duration.
	let source = StoredCredentials(&app.credentials);
	let (username, password) = source
		.get()
		.context("credentials missing; run 'pia-nm setup' first")?;

	let provider = Arc::new(PiaClient::new()?);
	let keys = Arc::new(KeyStore::new(app.config_store.keys_dir()));
	let gateway =
		Arc::new(NmGateway::system().context("NetworkManager is not reachable over D-Bus")?);
	let builder = ProfileBuilder::new(config.preferences(), current_username()?);

	let controller = Arc::new(RefreshController::new(provider, keys, gateway, builder));
	let orchestrator = RefreshOrchestrator::new(controller);

	let cancel = CancellationToken::new();
	{
		let cancel = cancel.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				eprintln!("\n{} Cancelling...", style("→").yellow());
				cancel.cancel();
			}
		});
	}

	let summary = orchestrator.run(&regions, &username, &password, &cancel).await;
	print_summary(&summary);

	if summary.any_succeeded() {
		if let Err(e) = app.config_store.set_last_refresh(summary.finished_at) {
			warn!(error = %e, "failed to record last_refresh");
		}
	}

	Ok(summary.exit_code())
}

fn print_summary(summary: &RefreshSummary) {
	for report in &summary.reports {
		let symbol = match report.outcome {
			Outcome::Ok => style(report.symbol()).green().bold(),
			Outcome::Warn(_) => style(report.symbol()).yellow().bold(),
			Outcome::Err(_) => style(report.symbol()).red().bold(),
		};
		println!(
			"{} {:<16} {} ({:.1}s)",
			symbol,
			report.region.to_string(),
			report.reason(),
			report.duration.as_secs_f64()
		);
	}
}
