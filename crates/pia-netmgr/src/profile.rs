// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Canonical NM connection description for a region, and the pure builder
//! that produces it from key material, registration details, and
//! preferences.

use pia_api::{ConnectionDetails, RegionId};
use pia_wg::{WgPrivateKey, WgPublicKey};
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use uuid::Uuid;

/// Connection names carry this prefix so dispatcher scripts can filter.
pub const CONNECTION_PREFIX: &str = "PIA-";

/// Interface names carry this prefix for the same reason.
pub const INTERFACE_PREFIX: &str = "wg-pia-";

/// VPN DNS outranks everything; more negative wins in NM.
pub const DNS_PRIORITY_VPN: i32 = -1500;

/// Linux IFNAMSIZ minus the trailing NUL.
const INTERFACE_NAME_MAX: usize = 15;

/// Namespace for deriving stable connection UUIDs from region ids. A
/// region's UUID never changes for the life of the region, even across
/// config rewrites.
const CONNECTION_UUID_NAMESPACE: Uuid = Uuid::from_u128(0x8d98_34b1_42f6_4e01_9a6c_2b7d_51c0_77ae);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value for {field}")]
pub struct ValidationError {
	pub field: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Mode {
	Disabled,
	Auto,
}

impl Ipv6Mode {
	pub fn method(&self) -> &'static str {
		match self {
			Ipv6Mode::Disabled => "disabled",
			Ipv6Mode::Auto => "auto",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTunnel {
	/// Route all of IPv4 through the tunnel.
	Off,
	/// Route everything except private, link-local, multicast, and reserved
	/// ranges.
	ExcludeRfc1918,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
	pub use_vpn_dns: bool,
	pub ipv6: Ipv6Mode,
	pub split_tunnel: SplitTunnel,
	pub fwmark: u32,
	pub keepalive: u16,
}

impl Default for Preferences {
	fn default() -> Self {
		Self {
			use_vpn_dns: true,
			ipv6: Ipv6Mode::Disabled,
			split_tunnel: SplitTunnel::Off,
			fwmark: 0,
			keepalive: 25,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerProfile {
	pub public_key: WgPublicKey,
	pub endpoint: SocketAddr,
	pub allowed_ips: Vec<String>,
	pub keepalive: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsProfile {
	pub servers: Vec<Ipv4Addr>,
	pub priority: i32,
	pub search: String,
	pub ignore_auto_dns: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Profile {
	pub address: Ipv4Addr,
	pub prefix: u32,
	/// `None` leaves system DNS untouched: no DNS keys are written at all.
	pub dns: Option<DnsProfile>,
}

/// Provider-independent description of one region's NM connection. The
/// UUID, interface name, peer public key, allowed-ips, address, and
/// permissions stay stable across refreshes; only the private key, the
/// peer endpoint, and the DNS servers change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionProfile {
	pub region: RegionId,
	pub connection_name: String,
	pub interface_name: String,
	pub uuid: Uuid,
	pub private_key: WgPrivateKey,
	pub peer: PeerProfile,
	pub ipv4: Ipv4Profile,
	pub ipv6: Ipv6Mode,
	pub fwmark: u32,
	pub owner: String,
	pub autoconnect: bool,
}

/// Stable connection UUID for a region.
pub fn connection_uuid(region: &RegionId) -> Uuid {
	Uuid::new_v5(&CONNECTION_UUID_NAMESPACE, region.as_str().as_bytes())
}

/// Interface name for a region, truncated to the kernel limit.
pub fn interface_name(region: &RegionId) -> String {
	let mut name = format!("{INTERFACE_PREFIX}{region}");
	name.truncate(INTERFACE_NAME_MAX);
	name
}

/// IPv4 minus RFC1918 (10/8, 172.16/12, 192.168/16), link-local
/// (169.254/16), multicast (224/4), and reserved (240/4).
pub const EXCLUDE_RFC1918_ALLOWED_IPS: &[&str] = &[
	"0.0.0.0/5",
	"8.0.0.0/7",
	"11.0.0.0/8",
	"12.0.0.0/6",
	"16.0.0.0/4",
	"32.0.0.0/3",
	"64.0.0.0/2",
	"128.0.0.0/3",
	"160.0.0.0/5",
	"168.0.0.0/8",
	"169.0.0.0/9",
	"169.128.0.0/10",
	"169.192.0.0/11",
	"169.224.0.0/12",
	"169.240.0.0/13",
	"169.248.0.0/14",
	"169.252.0.0/15",
	"169.255.0.0/16",
	"170.0.0.0/7",
	"172.0.0.0/12",
	"172.32.0.0/11",
	"172.64.0.0/10",
	"172.128.0.0/9",
	"173.0.0.0/8",
	"174.0.0.0/7",
	"176.0.0.0/4",
	"192.0.0.0/9",
	"192.128.0.0/11",
	"192.160.0.0/13",
	"192.169.0.0/16",
	"192.170.0.0/15",
	"192.172.0.0/14",
	"192.176.0.0/12",
	"192.192.0.0/10",
	"193.0.0.0/8",
	"194.0.0.0/7",
	"196.0.0.0/6",
	"200.0.0.0/5",
	"208.0.0.0/4",
];

/// Pure builder: equal inputs produce identical profiles.
pub struct ProfileBuilder {
	prefs: Preferences,
	owner: String,
}

impl ProfileBuilder {
	pub fn new(prefs: Preferences, owner: impl Into<String>) -> Self {
		Self {
			prefs,
			owner: owner.into(),
		}
	}

	pub fn preferences(&self) -> &Preferences {
		&self.prefs
	}

	pub fn build(
		&self,
		region: &RegionId,
		key: &WgPrivateKey,
		details: &ConnectionDetails,
	) -> Result<RegionProfile, ValidationError> {
		if self.owner.is_empty() {
			return Err(ValidationError { field: "owner" });
		}
		if details.server_label.is_empty() {
			return Err(ValidationError { field: "server_label" });
		}
		if details.server_endpoint.port() == 0 {
			return Err(ValidationError { field: "endpoint" });
		}
		if details.peer_ip.is_unspecified() || details.peer_ip.is_broadcast() {
			return Err(ValidationError { field: "peer_ip" });
		}
		if self.prefs.use_vpn_dns && details.dns_servers.is_empty() {
			return Err(ValidationError { field: "dns_servers" });
		}

		let allowed_ips = match self.prefs.split_tunnel {
			SplitTunnel::Off => vec!["0.0.0.0/0".to_string()],
			SplitTunnel::ExcludeRfc1918 => EXCLUDE_RFC1918_ALLOWED_IPS
				.iter()
				.map(|s| s.to_string())
				.collect(),
		};

		let dns = if self.prefs.use_vpn_dns {
			Some(DnsProfile {
				servers: details.dns_servers.clone(),
				priority: DNS_PRIORITY_VPN,
				search: "~".to_string(),
				ignore_auto_dns: true,
			})
		} else {
			None
		};

		Ok(RegionProfile {
			region: region.clone(),
			connection_name: format!("{CONNECTION_PREFIX}{}", details.server_label),
			interface_name: interface_name(region),
			uuid: connection_uuid(region),
			private_key: key.clone(),
			peer: PeerProfile {
				public_key: details.server_pubkey,
				endpoint: details.server_endpoint,
				allowed_ips,
				keepalive: self.prefs.keepalive,
			},
			ipv4: Ipv4Profile {
				address: details.peer_ip,
				prefix: 32,
				dns,
			},
			ipv6: self.prefs.ipv6,
			fwmark: self.prefs.fwmark,
			owner: self.owner.clone(),
			autoconnect: false,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use std::net::IpAddr;

	fn details() -> ConnectionDetails {
		ConnectionDetails {
			server_pubkey: WgPrivateKey::generate().public_key(),
			server_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 1337),
			peer_ip: Ipv4Addr::new(10, 2, 0, 2),
			dns_servers: vec![Ipv4Addr::new(10, 2, 0, 1)],
			server_label: "US East".to_string(),
		}
	}

	fn region() -> RegionId {
		"us-east".parse().unwrap()
	}

	#[test]
	fn builds_full_tunnel_profile() {
		let builder = ProfileBuilder::new(Preferences::default(), "alice");
		let profile = builder
			.build(&region(), &WgPrivateKey::generate(), &details())
			.unwrap();

		assert_eq!(profile.connection_name, "PIA-US East");
		assert_eq!(profile.interface_name, "wg-pia-us-east");
		assert_eq!(profile.peer.allowed_ips, vec!["0.0.0.0/0"]);
		assert_eq!(profile.ipv4.address, Ipv4Addr::new(10, 2, 0, 2));
		assert_eq!(profile.ipv4.prefix, 32);
		assert_eq!(profile.ipv6, Ipv6Mode::Disabled);
		assert!(!profile.autoconnect);

		let dns = profile.ipv4.dns.unwrap();
		assert_eq!(dns.priority, -1500);
		assert_eq!(dns.search, "~");
		assert!(dns.ignore_auto_dns);
		assert_eq!(dns.servers, vec![Ipv4Addr::new(10, 2, 0, 1)]);
	}

	#[test]
	fn dns_disabled_omits_all_dns_fields() {
		let prefs = Preferences {
			use_vpn_dns: false,
			..Preferences::default()
		};
		let builder = ProfileBuilder::new(prefs, "alice");
		let profile = builder
			.build(&region(), &WgPrivateKey::generate(), &details())
			.unwrap();

		assert!(profile.ipv4.dns.is_none());
	}

	#[test]
	fn build_is_deterministic() {
		let builder = ProfileBuilder::new(Preferences::default(), "alice");
		let keypair = WgPrivateKey::generate();
		let details = details();

		let a = builder.build(&region(), &keypair, &details).unwrap();
		let b = builder.build(&region(), &keypair, &details).unwrap();

		assert_eq!(a, b);
	}

	#[test]
	fn uuid_is_stable_per_region_and_distinct_across_regions() {
		let us: RegionId = "us-east".parse().unwrap();
		let jp: RegionId = "japan".parse().unwrap();

		assert_eq!(connection_uuid(&us), connection_uuid(&us));
		assert_ne!(connection_uuid(&us), connection_uuid(&jp));
	}

	#[test]
	fn interface_name_is_prefixed_and_bounded() {
		let long: RegionId = "de-frankfurt-extended".parse().unwrap();
		let name = interface_name(&long);

		assert!(name.starts_with("wg-pia-"));
		assert!(name.len() <= 15);
	}

	#[test]
	fn rejects_endpoint_port_zero() {
		let mut d = details();
		d.server_endpoint = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 0);

		let builder = ProfileBuilder::new(Preferences::default(), "alice");
		let err = builder.build(&region(), &WgPrivateKey::generate(), &d).unwrap_err();
		assert_eq!(err.field, "endpoint");
	}

	#[test]
	fn rejects_unspecified_peer_ip() {
		let mut d = details();
		d.peer_ip = Ipv4Addr::UNSPECIFIED;

		let builder = ProfileBuilder::new(Preferences::default(), "alice");
		let err = builder.build(&region(), &WgPrivateKey::generate(), &d).unwrap_err();
		assert_eq!(err.field, "peer_ip");
	}

	#[test]
	fn rejects_empty_dns_when_vpn_dns_enabled() {
		let mut d = details();
		d.dns_servers.clear();

		let builder = ProfileBuilder::new(Preferences::default(), "alice");
		let err = builder.build(&region(), &WgPrivateKey::generate(), &d).unwrap_err();
		assert_eq!(err.field, "dns_servers");
	}

	#[test]
	fn split_tunnel_swaps_in_the_exclusion_table() {
		let prefs = Preferences {
			split_tunnel: SplitTunnel::ExcludeRfc1918,
			..Preferences::default()
		};
		let builder = ProfileBuilder::new(prefs, "alice");
		let profile = builder
			.build(&region(), &WgPrivateKey::generate(), &details())
			.unwrap();

		assert_eq!(
			profile.peer.allowed_ips.len(),
			EXCLUDE_RFC1918_ALLOWED_IPS.len()
		);
		assert!(!profile.peer.allowed_ips.contains(&"0.0.0.0/0".to_string()));
	}

	fn cidr_covers(cidr: &str, addr: u32) -> bool {
		let (base, len) = cidr.split_once('/').unwrap();
		let base: Ipv4Addr = base.parse().unwrap();
		let len: u32 = len.parse().unwrap();
		let base = u32::from(base);
		addr >> (32 - len) == base >> (32 - len)
	}

	fn is_excluded(addr: u32) -> bool {
		let excluded = [
			("10.0.0.0", 8u32),
			("172.16.0.0", 12),
			("192.168.0.0", 16),
			("169.254.0.0", 16),
			("224.0.0.0", 4),
			("240.0.0.0", 4),
		];
		excluded.iter().any(|(base, len)| {
			let base = u32::from(base.parse::<Ipv4Addr>().unwrap());
			addr >> (32 - len) == base >> (32 - len)
		})
	}

	proptest! {
		/// An address is covered by exactly one table entry iff it is not in
		/// an excluded range, so the table is both complete and overlap-free.
		#[test]
		fn exclusion_table_is_exact(addr in any::<u32>()) {
			let covering = EXCLUDE_RFC1918_ALLOWED_IPS
				.iter()
				.filter(|cidr| cidr_covers(cidr, addr))
				.count();

			if is_excluded(addr) {
				prop_assert_eq!(covering, 0, "{} should be excluded", Ipv4Addr::from(addr));
			} else {
				prop_assert_eq!(covering, 1, "{} should be covered once", Ipv4Addr::from(addr));
			}
		}
	}
}
