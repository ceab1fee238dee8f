// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! NetworkManager dispatcher scripts: IPv6 leak guard and desktop
//! notifications, both keyed on the `wg-pia-` interface prefix. Installed
//! into the system dispatcher directory, which requires root.

use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const DISPATCHER_DIR: &str = "/etc/NetworkManager/dispatcher.d";
const IPV6_GUARD_SCRIPT: &str = "99-pia-nm-ipv6-guard.sh";
const NOTIFY_SCRIPT: &str = "98-pia-nm-connection-notify.sh";

pub const IPV6_GUARD: &str = r#"#!/bin/bash
#
# PIA NetworkManager IPv6 Guard
# Disables IPv6 system-wide while a PIA tunnel is up to prevent leaks,
# and restores it when the last PIA tunnel goes down.
#

VPN_INTERFACE_PREFIX="wg-pia-"
LOGFILE="/var/log/pia-nm-ipv6.log"

[ -e "$LOGFILE" ] || touch "$LOGFILE"
chmod 644 "$LOGFILE"

log() {
    echo "$(date '+%Y-%m-%d %H:%M:%S') - $1" >> "$LOGFILE"
}

disable_ipv6() {
    log "Disabling IPv6 system-wide (PIA VPN active)"
    sysctl -w net.ipv6.conf.all.disable_ipv6=1 >/dev/null 2>&1
    sysctl -w net.ipv6.conf.default.disable_ipv6=1 >/dev/null 2>&1
}

enable_ipv6() {
    log "Re-enabling IPv6 system-wide (PIA VPN inactive)"
    sysctl -w net.ipv6.conf.all.disable_ipv6=0 >/dev/null 2>&1
    sysctl -w net.ipv6.conf.default.disable_ipv6=0 >/dev/null 2>&1
}

vpn_is_active() {
    nmcli -t device | grep -E "^${VPN_INTERFACE_PREFIX}.*:connected$" >/dev/null 2>&1
}

INTERFACE="$1"
ACTION="$2"

case "$ACTION" in
    up)
        if [[ "$INTERFACE" == "${VPN_INTERFACE_PREFIX}"* ]]; then
            log "PIA interface $INTERFACE went UP"
            disable_ipv6
        fi
        ;;
    down)
        if [[ "$INTERFACE" == "${VPN_INTERFACE_PREFIX}"* ]]; then
            log "PIA interface $INTERFACE went DOWN"
            if ! vpn_is_active; then
                enable_ipv6
            else
                log "Another PIA tunnel still active, keeping IPv6 disabled"
            fi
        fi
        ;;
    *)
        # NM restart, sleep/resume and similar events: reconcile the sysctl
        # with the actual tunnel state.
        if vpn_is_active; then
            [ "$(sysctl -n net.ipv6.conf.all.disable_ipv6 2>/dev/null)" != "1" ] && disable_ipv6
        else
            [ "$(sysctl -n net.ipv6.conf.all.disable_ipv6 2>/dev/null)" != "0" ] && enable_ipv6
        fi
        ;;
esac

exit 0
"#;

pub const CONNECTION_NOTIFY: &str = r#"#!/bin/bash
#
# PIA NetworkManager Connection Notification
# Sends a desktop notification when a PIA tunnel comes up or goes down.
#

VPN_INTERFACE_PREFIX="wg-pia-"

notify_user() {
    local summary="$1" body="$2"
    local user uid
    user=$(loginctl list-sessions --no-legend 2>/dev/null | awk '{print $3}' | head -n1)
    [ -n "$user" ] || exit 0
    uid=$(id -u "$user")
    sudo -u "$user" DBUS_SESSION_BUS_ADDRESS="unix:path=/run/user/${uid}/bus" \
        notify-send --app-name="PIA VPN" "$summary" "$body" 2>/dev/null
}

INTERFACE="$1"
ACTION="$2"

[[ "$INTERFACE" == "${VPN_INTERFACE_PREFIX}"* ]] || exit 0

case "$ACTION" in
    up)
        notify_user "VPN connected" "Tunnel $INTERFACE is up"
        ;;
    down)
        notify_user "VPN disconnected" "Tunnel $INTERFACE is down"
        ;;
esac

exit 0
"#;

fn dispatcher_dir() -> PathBuf {
	PathBuf::from(DISPATCHER_DIR)
}

#[instrument]
pub fn install_scripts() -> anyhow::Result<()> {
	install_into(&dispatcher_dir())
}

fn install_into(dir: &Path) -> anyhow::Result<()> {
	anyhow::ensure!(
		dir.exists(),
		"dispatcher directory {} does not exist; is NetworkManager installed?",
		dir.display()
	);

	for (name, content) in [(IPV6_GUARD_SCRIPT, IPV6_GUARD), (NOTIFY_SCRIPT, CONNECTION_NOTIFY)] {
		let path = dir.join(name);
		std::fs::write(&path, content)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
		}

		debug!(path = %path.display(), "dispatcher script installed");
	}
	Ok(())
}

#[instrument]
pub fn uninstall_scripts() -> anyhow::Result<()> {
	uninstall_from(&dispatcher_dir())
}

fn uninstall_from(dir: &Path) -> anyhow::Result<()> {
	for name in [IPV6_GUARD_SCRIPT, NOTIFY_SCRIPT] {
		match std::fs::remove_file(dir.join(name)) {
			Ok(()) => debug!(script = name, "dispatcher script removed"),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn scripts_filter_on_the_interface_prefix() {
		assert!(IPV6_GUARD.contains("VPN_INTERFACE_PREFIX=\"wg-pia-\""));
		assert!(CONNECTION_NOTIFY.contains("VPN_INTERFACE_PREFIX=\"wg-pia-\""));
	}

	#[test]
	fn guard_reconciles_on_unexpected_events() {
		assert!(IPV6_GUARD.contains("disable_ipv6=1"));
		assert!(IPV6_GUARD.contains("disable_ipv6=0"));
		assert!(IPV6_GUARD.contains("*)"));
	}

	#[cfg(unix)]
	#[test]
	fn install_writes_executable_scripts() {
		use std::os::unix::fs::PermissionsExt;

		let temp = TempDir::new().unwrap();
		install_into(temp.path()).unwrap();

		for name in [IPV6_GUARD_SCRIPT, NOTIFY_SCRIPT] {
			let mode = std::fs::metadata(temp.path().join(name))
				.unwrap()
				.permissions()
				.mode() & 0o777;
			assert_eq!(mode, 0o755);
		}
	}

	#[test]
	fn uninstall_tolerates_missing_scripts() {
		let temp = TempDir::new().unwrap();
		uninstall_from(temp.path()).unwrap();
	}
}
