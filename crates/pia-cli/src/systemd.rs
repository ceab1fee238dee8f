// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! systemd user units driving the periodic refresh. The timer fires five
//! minutes after boot and every twelve hours thereafter, well inside the
//! provider's 24-hour token lifetime.

use anyhow::Context;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, instrument};

const SERVICE_UNIT: &str = "pia-nm-refresh.service";
const TIMER_UNIT: &str = "pia-nm-refresh.timer";

pub fn service_unit_content(executable: &str) -> String {
	format!(
		"[Unit]\n\
		Description=PIA WireGuard Token Refresh\n\
		After=network-online.target\n\
		Wants=network-online.target\n\
		\n\
		[Service]\n\
		Type=oneshot\n\
		ExecStart={executable} refresh\n\
		StandardOutput=journal\n\
		StandardError=journal\n\
		SyslogIdentifier=pia-nm-refresh\n\
		PrivateTmp=true\n\
		NoNewPrivileges=true\n"
	)
}

pub fn timer_unit_content() -> String {
	"[Unit]\n\
	Description=PIA WireGuard Token Refresh Timer\n\
	\n\
	[Timer]\n\
	OnBootSec=5min\n\
	OnUnitActiveSec=12h\n\
	Persistent=true\n\
	\n\
	[Install]\n\
	WantedBy=timers.target\n"
		.to_string()
}

fn unit_dir() -> anyhow::Result<PathBuf> {
	dirs::config_dir()
		.map(|d| d.join("systemd/user"))
		.context("cannot locate the user configuration directory")
}

fn systemctl_user(args: &[&str]) -> anyhow::Result<()> {
	let status = Command::new("systemctl")
		.arg("--user")
		.args(args)
		.status()
		.context("failed to run systemctl")?;
	anyhow::ensure!(status.success(), "systemctl --user {} failed", args.join(" "));
	Ok(())
}

#[instrument]
pub fn install_units() -> anyhow::Result<()> {
	let dir = unit_dir()?;
	std::fs::create_dir_all(&dir)?;

	let executable = std::env::current_exe()
		.context("cannot determine the pia-nm executable path")?
		.display()
		.to_string();

	std::fs::write(dir.join(SERVICE_UNIT), service_unit_content(&executable))?;
	std::fs::write(dir.join(TIMER_UNIT), timer_unit_content())?;
	debug!(dir = %dir.display(), "unit files written");

	systemctl_user(&["daemon-reload"])
}

#[instrument]
pub fn uninstall_units() -> anyhow::Result<()> {
	let _ = systemctl_user(&["disable", "--now", TIMER_UNIT]);

	let dir = unit_dir()?;
	for unit in [SERVICE_UNIT, TIMER_UNIT] {
		match std::fs::remove_file(dir.join(unit)) {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
	}

	systemctl_user(&["daemon-reload"])
}

#[instrument]
pub fn enable_timer() -> anyhow::Result<()> {
	systemctl_user(&["enable", "--now", TIMER_UNIT])
}

#[instrument]
pub fn disable_timer() -> anyhow::Result<()> {
	systemctl_user(&["disable", "--now", TIMER_UNIT])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn service_unit_runs_refresh() {
		let unit = service_unit_content("/home/alice/.local/bin/pia-nm");
		assert!(unit.contains("ExecStart=/home/alice/.local/bin/pia-nm refresh"));
		assert!(unit.contains("Type=oneshot"));
		assert!(unit.contains("After=network-online.target"));
	}

	#[test]
	fn timer_fires_after_boot_and_every_twelve_hours() {
		let unit = timer_unit_content();
		assert!(unit.contains("OnBootSec=5min"));
		assert!(unit.contains("OnUnitActiveSec=12h"));
		assert!(unit.contains("Persistent=true"));
		assert!(unit.contains("WantedBy=timers.target"));
	}
}
