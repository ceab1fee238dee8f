// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conversion between [`RegionProfile`] and NM's `a{sa{sv}}` settings
//! dictionaries, plus the targeted mutation a refresh applies to a running
//! configuration.

use crate::error::{NmError, Result};
use crate::profile::RegionProfile;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use zvariant::{OwnedValue, Value};

/// NM connection settings on the wire: section name to key/value dict.
pub type SettingsMap = HashMap<String, HashMap<String, OwnedValue>>;

/// A configuration fetched from an active device via `GetAppliedConnection`.
/// Mutable; fed back through `Reapply` under a version-id CAS.
#[derive(Debug, Clone)]
pub struct AppliedConfig(pub SettingsMap);

fn ov<'a>(v: impl Into<Value<'a>>) -> Result<OwnedValue> {
	OwnedValue::try_from(v.into()).map_err(|e| NmError::Shape(e.to_string()))
}

/// in_addr_t encoding NM uses for the legacy `ipv4.dns` array.
fn dns_addr(addr: Ipv4Addr) -> u32 {
	u32::from_ne_bytes(addr.octets())
}

fn peer_dicts(profile: &RegionProfile) -> Result<Vec<HashMap<String, OwnedValue>>> {
	let mut peer = HashMap::new();
	peer.insert(
		"public-key".to_string(),
		ov(profile.peer.public_key.to_base64())?,
	);
	peer.insert(
		"endpoint".to_string(),
		ov(profile.peer.endpoint.to_string())?,
	);
	peer.insert(
		"allowed-ips".to_string(),
		ov(profile.peer.allowed_ips.clone())?,
	);
	peer.insert(
		"persistent-keepalive".to_string(),
		ov(u32::from(profile.peer.keepalive))?,
	);
	Ok(vec![peer])
}

/// Build the full settings dictionary for `AddConnection2` / `Update2`.
pub fn profile_to_settings(profile: &RegionProfile) -> Result<SettingsMap> {
	let mut settings = SettingsMap::new();

	let mut connection = HashMap::new();
	connection.insert("id".to_string(), ov(profile.connection_name.clone())?);
	connection.insert("uuid".to_string(), ov(profile.uuid.to_string())?);
	connection.insert("type".to_string(), ov("wireguard")?);
	connection.insert(
		"interface-name".to_string(),
		ov(profile.interface_name.clone())?,
	);
	connection.insert("autoconnect".to_string(), ov(profile.autoconnect)?);
	connection.insert(
		"permissions".to_string(),
		ov(vec![format!("user:{}:", profile.owner)])?,
	);
	settings.insert("connection".to_string(), connection);

	let mut wireguard = HashMap::new();
	wireguard.insert(
		"private-key".to_string(),
		ov(profile.private_key.expose_base64())?,
	);
	wireguard.insert("fwmark".to_string(), ov(profile.fwmark)?);
	wireguard.insert("peers".to_string(), ov(peer_dicts(profile)?)?);
	settings.insert("wireguard".to_string(), wireguard);

	let mut ipv4 = HashMap::new();
	ipv4.insert("method".to_string(), ov("manual")?);

	let mut address = HashMap::new();
	address.insert("address".to_string(), ov(profile.ipv4.address.to_string())?);
	address.insert("prefix".to_string(), ov(profile.ipv4.prefix)?);
	ipv4.insert("address-data".to_string(), ov(vec![address])?);

	// Point-to-point: 0.0.0.0 marks the peer as the default route without a
	// conventional gateway. NM's auto-default-route policy routing does the
	// rest; metric 50 orders us ahead of physical connections.
	ipv4.insert("gateway".to_string(), ov("0.0.0.0")?);
	ipv4.insert("route-metric".to_string(), ov(50i64)?);

	if let Some(dns) = &profile.ipv4.dns {
		ipv4.insert(
			"dns".to_string(),
			ov(dns.servers.iter().map(|a| dns_addr(*a)).collect::<Vec<u32>>())?,
		);
		ipv4.insert("dns-priority".to_string(), ov(dns.priority)?);
		ipv4.insert("dns-search".to_string(), ov(vec![dns.search.clone()])?);
		ipv4.insert("ignore-auto-dns".to_string(), ov(dns.ignore_auto_dns)?);
	}
	settings.insert("ipv4".to_string(), ipv4);

	let mut ipv6 = HashMap::new();
	ipv6.insert("method".to_string(), ov(profile.ipv6.method())?);
	settings.insert("ipv6".to_string(), ipv6);

	Ok(settings)
}

/// Mutate the fields a refresh changes (the local private key, the peer
/// entry with its new endpoint, and the DNS servers when VPN DNS is
/// enabled), leaving everything else in the applied configuration alone.
pub fn apply_refresh(applied: &mut AppliedConfig, profile: &RegionProfile) -> Result<()> {
	let wireguard = applied.0.entry("wireguard".to_string()).or_default();
	wireguard.insert(
		"private-key".to_string(),
		ov(profile.private_key.expose_base64())?,
	);
	wireguard.insert("peers".to_string(), ov(peer_dicts(profile)?)?);

	if let Some(dns) = &profile.ipv4.dns {
		let ipv4 = applied.0.entry("ipv4".to_string()).or_default();
		ipv4.insert(
			"dns".to_string(),
			ov(dns.servers.iter().map(|a| dns_addr(*a)).collect::<Vec<u32>>())?,
		);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::profile::{Preferences, ProfileBuilder};
	use pia_api::{ConnectionDetails, RegionId};
	use pia_wg::WgPrivateKey;
	use std::net::{IpAddr, SocketAddr};

	fn profile() -> RegionProfile {
		let details = ConnectionDetails {
			server_pubkey: WgPrivateKey::generate().public_key(),
			server_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 1337),
			peer_ip: Ipv4Addr::new(10, 2, 0, 2),
			dns_servers: vec![Ipv4Addr::new(10, 2, 0, 1)],
			server_label: "US East".to_string(),
		};
		let region: RegionId = "us-east".parse().unwrap();
		ProfileBuilder::new(Preferences::default(), "alice")
			.build(&region, &WgPrivateKey::generate(), &details)
			.unwrap()
	}

	fn get_str(settings: &SettingsMap, section: &str, key: &str) -> String {
		String::try_from(settings[section][key].clone()).unwrap()
	}

	#[test]
	fn settings_carry_connection_identity() {
		let p = profile();
		let settings = profile_to_settings(&p).unwrap();

		assert_eq!(get_str(&settings, "connection", "id"), "PIA-US East");
		assert_eq!(get_str(&settings, "connection", "uuid"), p.uuid.to_string());
		assert_eq!(get_str(&settings, "connection", "type"), "wireguard");
		assert_eq!(
			get_str(&settings, "connection", "interface-name"),
			"wg-pia-us-east"
		);
		assert!(!bool::try_from(settings["connection"]["autoconnect"].clone()).unwrap());
	}

	#[test]
	fn settings_name_the_owner_in_permissions() {
		let settings = profile_to_settings(&profile()).unwrap();
		let permissions =
			Vec::<String>::try_from(settings["connection"]["permissions"].clone()).unwrap();

		assert_eq!(permissions, vec!["user:alice:".to_string()]);
	}

	#[test]
	fn settings_carry_wireguard_peer() {
		let p = profile();
		let settings = profile_to_settings(&p).unwrap();

		let peers = Vec::<HashMap<String, OwnedValue>>::try_from(
			settings["wireguard"]["peers"].clone(),
		)
		.unwrap();
		assert_eq!(peers.len(), 1);
		assert_eq!(
			String::try_from(peers[0]["endpoint"].clone()).unwrap(),
			"1.2.3.4:1337"
		);
		assert_eq!(
			String::try_from(peers[0]["public-key"].clone()).unwrap(),
			p.peer.public_key.to_base64()
		);
		assert_eq!(
			Vec::<String>::try_from(peers[0]["allowed-ips"].clone()).unwrap(),
			vec!["0.0.0.0/0".to_string()]
		);
		assert_eq!(
			u32::try_from(peers[0]["persistent-keepalive"].clone()).unwrap(),
			25
		);
	}

	#[test]
	fn settings_carry_dns_block_when_enabled() {
		let settings = profile_to_settings(&profile()).unwrap();

		assert_eq!(
			i32::try_from(settings["ipv4"]["dns-priority"].clone()).unwrap(),
			-1500
		);
		assert!(bool::try_from(settings["ipv4"]["ignore-auto-dns"].clone()).unwrap());
		assert_eq!(
			Vec::<String>::try_from(settings["ipv4"]["dns-search"].clone()).unwrap(),
			vec!["~".to_string()]
		);
		assert_eq!(
			Vec::<u32>::try_from(settings["ipv4"]["dns"].clone()).unwrap(),
			vec![dns_addr(Ipv4Addr::new(10, 2, 0, 1))]
		);
	}

	#[test]
	fn settings_omit_dns_keys_when_disabled() {
		let mut p = profile();
		p.ipv4.dns = None;
		let settings = profile_to_settings(&p).unwrap();

		for key in ["dns", "dns-priority", "dns-search", "ignore-auto-dns"] {
			assert!(
				!settings["ipv4"].contains_key(key),
				"{key} should be absent"
			);
		}
	}

	#[test]
	fn settings_ipv6_method_tracks_mode() {
		let settings = profile_to_settings(&profile()).unwrap();
		assert_eq!(get_str(&settings, "ipv6", "method"), "disabled");
	}

	#[test]
	fn apply_refresh_touches_only_refresh_fields() {
		let p = profile();
		let mut applied = AppliedConfig(profile_to_settings(&p).unwrap());

		// A later registration hands out a new key and endpoint.
		let mut next = profile();
		next.peer.endpoint = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 5)), 1337);

		apply_refresh(&mut applied, &next).unwrap();

		let peers = Vec::<HashMap<String, OwnedValue>>::try_from(
			applied.0["wireguard"]["peers"].clone(),
		)
		.unwrap();
		assert_eq!(
			String::try_from(peers[0]["endpoint"].clone()).unwrap(),
			"1.2.3.5:1337"
		);
		assert_eq!(
			String::try_from(applied.0["wireguard"]["private-key"].clone()).unwrap(),
			next.private_key.expose_base64()
		);

		// Identity fields are untouched.
		assert_eq!(
			String::try_from(applied.0["connection"]["uuid"].clone()).unwrap(),
			p.uuid.to_string()
		);
		assert_eq!(
			String::try_from(applied.0["connection"]["interface-name"].clone()).unwrap(),
			p.interface_name
		);
	}

	#[test]
	fn apply_refresh_skips_dns_when_disabled() {
		let mut p = profile();
		p.ipv4.dns = None;
		let mut applied = AppliedConfig(profile_to_settings(&p).unwrap());
		let before = applied.0["ipv4"].clone();

		apply_refresh(&mut applied, &p).unwrap();

		assert_eq!(applied.0["ipv4"].len(), before.len());
		assert!(!applied.0["ipv4"].contains_key("dns"));
	}

	#[test]
	fn dns_addr_is_in_addr_t() {
		let encoded = dns_addr(Ipv4Addr::new(10, 2, 0, 1));
		assert_eq!(encoded.to_ne_bytes(), [10, 2, 0, 1]);
	}
}
