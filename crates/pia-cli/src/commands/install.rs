// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::{dispatcher, systemd};
use console::style;
use tracing::instrument;

#[instrument]
pub fn install() -> anyhow::Result<i32> {
	systemd::install_units()?;
	println!(
		"{} Installed systemd user units (refresh every 12h, 5min after boot)",
		style("✓").green().bold()
	);

	match dispatcher::install_scripts() {
		Ok(()) => println!(
			"{} Installed NetworkManager dispatcher scripts",
			style("✓").green().bold()
		),
		Err(e) => {
			println!(
				"{} Dispatcher scripts not installed: {e:#}",
				style("⚠").yellow().bold()
			);
			println!("  Re-run with root privileges to install them.");
		}
	}

	println!("  Enable the timer with {}.", style("pia-nm enable").cyan());
	Ok(0)
}

#[instrument]
pub fn uninstall() -> anyhow::Result<i32> {
	systemd::uninstall_units()?;
	println!("{} Removed systemd user units", style("✓").green().bold());

	match dispatcher::uninstall_scripts() {
		Ok(()) => println!(
			"{} Removed NetworkManager dispatcher scripts",
			style("✓").green().bold()
		),
		Err(e) => println!(
			"{} Dispatcher scripts not removed: {e:#}",
			style("⚠").yellow().bold()
		),
	}
	Ok(0)
}

#[instrument]
pub fn enable() -> anyhow::Result<i32> {
	systemd::enable_timer()?;
	println!("{} Refresh timer enabled", style("✓").green().bold());
	Ok(0)
}

#[instrument]
pub fn disable() -> anyhow::Result<i32> {
	systemd::disable_timer()?;
	println!("{} Refresh timer disabled", style("✓").green().bold());
	Ok(0)
}
