// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{ApiError, Result};
use crate::types::{
	AccountPassword, AuthToken, ConnectionDetails, RegionDescriptor, RegionId, WgServer,
};
use pia_wg::WgPublicKey;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.privateinternetaccess.com";
const SERVERLIST_URL: &str = "https://serverlist.piaservers.net/vpninfo/servers/v6";

/// WireGuard registration port on PIA servers.
const WG_API_PORT: u16 = 1337;

/// Per-attempt request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = concat!("pia-nm/", env!("CARGO_PKG_VERSION"));

/// Client for the PIA control API. Certificate validation runs against the
/// system trust store and is never disabled.
pub struct PiaClient {
	http: Client,
	base_url: Url,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	token: String,
}

#[derive(Debug, Deserialize)]
struct ServerListResponse {
	regions: Vec<ServerListRegion>,
}

#[derive(Debug, Deserialize)]
struct ServerListRegion {
	id: String,
	name: String,
	#[serde(default)]
	port_forward: bool,
	#[serde(default)]
	servers: ServerListServers,
}

#[derive(Debug, Default, Deserialize)]
struct ServerListServers {
	#[serde(default)]
	wg: Vec<ServerListServer>,
}

#[derive(Debug, Deserialize)]
struct ServerListServer {
	ip: String,
	cn: String,
}

#[derive(Debug, Deserialize)]
struct AddKeyResponse {
	status: String,
	#[serde(default)]
	server_key: Option<String>,
	#[serde(default)]
	server_ip: Option<String>,
	#[serde(default)]
	server_port: Option<u16>,
	#[serde(default)]
	peer_ip: Option<String>,
	#[serde(default)]
	dns_servers: Vec<String>,
}

fn validate_https_url(url: &Url) -> Result<()> {
	if url.scheme() != "https" {
		return Err(ApiError::Other("API base URL must use https://".to_string()));
	}
	Ok(())
}

/// Run `op`, repeating it exactly once immediately if the first attempt
/// fails at the transport level. Back-off across cycles is the scheduler's
/// job, not this client's.
async fn retry_transport_once<T, F, Fut>(mut op: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	match op().await {
		Err(e) if e.is_transport() => {
			warn!(error = %e, "transport error, retrying once");
			op().await
		}
		other => other,
	}
}

impl PiaClient {
	pub fn new() -> Result<Self> {
		Self::with_base_url(DEFAULT_BASE_URL)
	}

	pub fn with_base_url(base_url: &str) -> Result<Self> {
		let base_url = Url::parse(base_url).map_err(|e| ApiError::Other(e.to_string()))?;
		validate_https_url(&base_url)?;

		let http = Client::builder()
			.user_agent(USER_AGENT)
			.timeout(REQUEST_TIMEOUT)
			.build()?;

		Ok(Self { http, base_url })
	}

	fn api_url(&self, path: &str) -> Result<Url> {
		self.base_url
			.join(path)
			.map_err(|e| ApiError::Other(e.to_string()))
	}

	/// Exchange account credentials for an auth token. HTTP Basic over TLS.
	#[instrument(skip_all)]
	pub async fn authenticate(
		&self,
		username: &str,
		password: &AccountPassword,
	) -> Result<AuthToken> {
		let url = self.api_url("/api/client/v2/token")?;
		debug!(url = %url, "requesting auth token");

		let response = retry_transport_once(|| async {
			self.http
				.post(url.clone())
				.basic_auth(username, Some(password.expose()))
				.send()
				.await
				.map_err(ApiError::from)
		})
		.await?;

		match response.status() {
			StatusCode::OK => {
				let body: TokenResponse = response
					.json()
					.await
					.map_err(|_| ApiError::InvalidResponse { field: "token" })?;
				if body.token.is_empty() {
					return Err(ApiError::InvalidResponse { field: "token" });
				}
				info!("authentication successful");
				Ok(AuthToken::new(body.token))
			}
			StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::AuthInvalid),
			StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS => Err(ApiError::AuthLocked),
			status if status.is_client_error() => Err(ApiError::AuthInvalid),
			status => Err(ApiError::UnexpectedStatus(status)),
		}
	}

	/// Fetch the region catalogue. Callers cache this; the client does not.
	#[instrument(skip(self))]
	pub async fn list_regions(&self) -> Result<Vec<RegionDescriptor>> {
		let response = retry_transport_once(|| async {
			self.http
				.get(SERVERLIST_URL)
				.send()
				.await
				.map_err(ApiError::from)
		})
		.await?;

		if !response.status().is_success() {
			return Err(ApiError::UnexpectedStatus(response.status()));
		}

		// The serverlist endpoint appends a signature after the JSON payload;
		// only the first line is the document.
		let text = response.text().await?;
		let first_line = text
			.lines()
			.next()
			.ok_or(ApiError::InvalidResponse { field: "regions" })?;
		let parsed: ServerListResponse = serde_json::from_str(first_line)
			.map_err(|_| ApiError::InvalidResponse { field: "regions" })?;

		let regions = parsed
			.regions
			.into_iter()
			.filter_map(|r| {
				let id: RegionId = r.id.parse().ok()?;
				let wg_servers = r
					.servers
					.wg
					.into_iter()
					.filter_map(|s| {
						Some(WgServer {
							ip: s.ip.parse().ok()?,
							hostname: s.cn,
						})
					})
					.collect();
				Some(RegionDescriptor {
					id,
					label: r.name,
					port_forwarding: r.port_forward,
					wg_servers,
				})
			})
			.collect::<Vec<_>>();

		info!(count = regions.len(), "fetched region list");
		Ok(regions)
	}

	/// Select a server for the region and register the public key against
	/// it in one call.
	#[instrument(skip(self, token, public_key), fields(public_key = %public_key))]
	pub async fn register_key(
		&self,
		token: &AuthToken,
		region: &RegionId,
		public_key: &WgPublicKey,
	) -> Result<ConnectionDetails> {
		let regions = self.list_regions().await?;
		let descriptor = regions
			.into_iter()
			.find(|r| &r.id == region)
			.ok_or_else(|| ApiError::UnknownRegion(region.clone()))?;

		let server = descriptor
			.wg_servers
			.first()
			.ok_or_else(|| ApiError::UnknownRegion(region.clone()))?;

		debug!(server = %server.hostname, "registering key with server");

		// The registration endpoint lives on the VPN server itself, reached
		// by hostname for SNI but pinned to the advertised address so no DNS
		// lookup happens.
		let http = Client::builder()
			.user_agent(USER_AGENT)
			.timeout(REQUEST_TIMEOUT)
			.resolve(
				&server.hostname,
				SocketAddr::new(IpAddr::V4(server.ip), WG_API_PORT),
			)
			.build()?;

		let url = format!("https://{}:{}/addKey", server.hostname, WG_API_PORT);
		let pubkey_b64 = public_key.to_base64();
		let response = retry_transport_once(|| async {
			http.get(url.as_str())
				.query(&[("pt", token.expose()), ("pubkey", pubkey_b64.as_str())])
				.send()
				.await
				.map_err(ApiError::from)
		})
		.await?;

		match response.status() {
			StatusCode::OK => {}
			StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
				return Err(ApiError::TokenExpired)
			}
			status => return Err(ApiError::UnexpectedStatus(status)),
		}

		let body: AddKeyResponse = response
			.json()
			.await
			.map_err(|_| ApiError::InvalidResponse { field: "status" })?;

		let details = parse_add_key_response(body, &descriptor.label)?;
		info!(server = %server.hostname, endpoint = %details.server_endpoint, "key registered");
		Ok(details)
	}
}

/// Validate the registration payload field by field. Shape errors name the
/// field and abort the refresh; they never carry the offending value.
fn parse_add_key_response(body: AddKeyResponse, label: &str) -> Result<ConnectionDetails> {
	if body.status != "OK" {
		return Err(ApiError::KeyRejected(body.status));
	}

	let server_key = body
		.server_key
		.ok_or(ApiError::InvalidResponse { field: "server_key" })?;
	let server_pubkey = WgPublicKey::from_base64(&server_key)
		.map_err(|_| ApiError::InvalidResponse { field: "server_key" })?;

	let server_ip: Ipv4Addr = body
		.server_ip
		.ok_or(ApiError::InvalidResponse { field: "server_ip" })?
		.parse()
		.map_err(|_| ApiError::InvalidResponse { field: "server_ip" })?;

	let server_port = body
		.server_port
		.ok_or(ApiError::InvalidResponse { field: "server_port" })?;
	if server_port == 0 {
		return Err(ApiError::InvalidResponse { field: "server_port" });
	}

	let peer_ip: Ipv4Addr = body
		.peer_ip
		.ok_or(ApiError::InvalidResponse { field: "peer_ip" })?
		.parse()
		.map_err(|_| ApiError::InvalidResponse { field: "peer_ip" })?;

	let dns_servers = body
		.dns_servers
		.iter()
		.map(|s| s.parse::<Ipv4Addr>())
		.collect::<std::result::Result<Vec<_>, _>>()
		.map_err(|_| ApiError::InvalidResponse { field: "dns_servers" })?;

	Ok(ConnectionDetails {
		server_pubkey,
		server_endpoint: SocketAddr::new(IpAddr::V4(server_ip), server_port),
		peer_ip,
		dns_servers,
		server_label: label.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use pia_wg::WgPrivateKey;

	fn ok_body() -> AddKeyResponse {
		AddKeyResponse {
			status: "OK".to_string(),
			server_key: Some(WgPrivateKey::generate().public_key().to_base64()),
			server_ip: Some("1.2.3.4".to_string()),
			server_port: Some(1337),
			peer_ip: Some("10.2.0.2".to_string()),
			dns_servers: vec!["10.2.0.1".to_string()],
		}
	}

	#[test]
	fn rejects_http_base_url() {
		assert!(PiaClient::with_base_url("http://example.com").is_err());
	}

	#[test]
	fn parse_add_key_accepts_complete_payload() {
		let details = parse_add_key_response(ok_body(), "US East").unwrap();

		assert_eq!(details.server_endpoint.to_string(), "1.2.3.4:1337");
		assert_eq!(details.peer_ip, Ipv4Addr::new(10, 2, 0, 2));
		assert_eq!(details.dns_servers, vec![Ipv4Addr::new(10, 2, 0, 1)]);
		assert_eq!(details.server_label, "US East");
	}

	#[test]
	fn parse_add_key_classifies_non_ok_status_as_rejection() {
		let mut body = ok_body();
		body.status = "ERROR".to_string();

		let err = parse_add_key_response(body, "US East").unwrap_err();
		assert!(matches!(err, ApiError::KeyRejected(_)));
	}

	#[test]
	fn parse_add_key_flags_missing_fields_by_name() {
		let mut body = ok_body();
		body.peer_ip = None;

		let err = parse_add_key_response(body, "US East").unwrap_err();
		match err {
			ApiError::InvalidResponse { field } => assert_eq!(field, "peer_ip"),
			other => panic!("expected InvalidResponse, got {other:?}"),
		}
	}

	#[test]
	fn parse_add_key_flags_bad_server_key() {
		let mut body = ok_body();
		body.server_key = Some("not-base64!!".to_string());

		let err = parse_add_key_response(body, "US East").unwrap_err();
		assert!(matches!(
			err,
			ApiError::InvalidResponse { field: "server_key" }
		));
	}

	#[test]
	fn parse_add_key_rejects_port_zero() {
		let mut body = ok_body();
		body.server_port = Some(0);

		let err = parse_add_key_response(body, "US East").unwrap_err();
		assert!(matches!(
			err,
			ApiError::InvalidResponse { field: "server_port" }
		));
	}

	#[test]
	fn parse_add_key_rejects_malformed_dns() {
		let mut body = ok_body();
		body.dns_servers = vec!["10.2.0.1".to_string(), "not-an-ip".to_string()];

		let err = parse_add_key_response(body, "US East").unwrap_err();
		assert!(matches!(
			err,
			ApiError::InvalidResponse { field: "dns_servers" }
		));
	}

	#[test]
	fn serverlist_document_parses_first_line_shape() {
		let doc = r#"{"regions":[{"id":"us_east","name":"US East","port_forward":true,"servers":{"wg":[{"ip":"1.2.3.4","cn":"newjersey403"}]}},{"id":"japan","name":"Japan","servers":{"wg":[]}}]}"#;
		let parsed: ServerListResponse = serde_json::from_str(doc).unwrap();

		assert_eq!(parsed.regions.len(), 2);
		assert_eq!(parsed.regions[0].id, "us_east");
		assert!(parsed.regions[0].port_forward);
		assert_eq!(parsed.regions[0].servers.wg[0].cn, "newjersey403");
		assert!(!parsed.regions[1].port_forward);
	}

	#[tokio::test]
	async fn retry_transport_once_gives_up_after_second_failure() {
		use std::sync::atomic::{AtomicU32, Ordering};

		let attempts = AtomicU32::new(0);
		let result: Result<()> = retry_transport_once(|| async {
			attempts.fetch_add(1, Ordering::SeqCst);
			// A connect-class failure to a port nothing listens on.
			Err(reqwest::Client::new()
				.get("http://127.0.0.1:1")
				.send()
				.await
				.unwrap_err()
				.into())
		})
		.await;

		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn retry_transport_once_does_not_retry_api_errors() {
		use std::sync::atomic::{AtomicU32, Ordering};

		let attempts = AtomicU32::new(0);
		let result: Result<()> = retry_transport_once(|| async {
			attempts.fetch_add(1, Ordering::SeqCst);
			Err(ApiError::AuthInvalid)
		})
		.await;

		assert!(matches!(result, Err(ApiError::AuthInvalid)));
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}
}
