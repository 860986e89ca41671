// # Cloudflare DNS Provider
//
// Cloudflare API v4 implementation of `DnsProvider`.
//
// ## Implementation Status
//
// - ✅ One HTTP request per trait call (plus a zone lookup by exact name)
// - ✅ Token auth, or legacy `X-Auth-Email` / `X-Auth-Key` (token wins)
// - ✅ `success: false` is an error, never "zero records"
// - ✅ HTTP status codes mapped through `Error::from_status`
// - ✅ A and AAAA records
// - ✅ Updates PUT the full record, keeping TTL and proxy flag
// - ❌ NO retry logic (a failed action is retried by the next tick)
// - ❌ NO caching (records are fetched fresh every tick)
// - ❌ NO background tasks
//
// ### Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS API calls to the configured API base only
// - ✅ Parse provider-specific responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Decide what to create, update or delete (owned by the differ)
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or `Debug` output
//
// ## API Reference
//
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=...&page=1&per_page=500`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_core::config::ProviderConfig;
use ddns_core::traits::{DnsProvider, DnsProviderFactory};
use ddns_core::{Error, NewRecord, RecordKind, RemoteRecord, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Records requested per list call
const LIST_PAGE_SIZE: u32 = 500;

const PROVIDER: &str = "cloudflare";

/// How requests authenticate
#[derive(Clone)]
pub enum Credentials {
    /// Scoped API token, sent as a bearer token
    Token(String),
    /// Account email plus global API key
    KeyPair {
        /// Account email
        email: String,
        /// Global API key
        api_key: String,
    },
}

impl Credentials {
    /// Pick credentials from configuration; a non-empty token takes precedence
    pub fn from_parts(
        email: Option<&str>,
        api_key: Option<&str>,
        api_token: Option<&str>,
    ) -> Result<Self> {
        if let Some(token) = api_token.filter(|t| !t.is_empty()) {
            return Ok(Credentials::Token(token.to_string()));
        }

        match (
            email.filter(|e| !e.is_empty()),
            api_key.filter(|k| !k.is_empty()),
        ) {
            (Some(email), Some(api_key)) => Ok(Credentials::KeyPair {
                email: email.to_string(),
                api_key: api_key.to_string(),
            }),
            _ => Err(Error::config(
                "Cloudflare requires api_token or both email and api_key",
            )),
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::KeyPair { email, api_key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", api_key),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(<REDACTED>)"),
            Credentials::KeyPair { email, .. } => f
                .debug_struct("KeyPair")
                .field("email", email)
                .field("api_key", &"<REDACTED>")
                .finish(),
        }
    }
}

/// Cloudflare API v4 envelope
#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
    content: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    proxied: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeletedRecord {
    #[allow(dead_code)]
    id: String,
}

/// Body of create and update calls
#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Cloudflare DNS provider
///
/// Zone IDs are looked up by exact zone name on every list/create; the zone
/// a record came from travels with it in `RemoteRecord::extra`.
pub struct CloudflareProvider {
    client: reqwest::Client,
    api_base: String,
    credentials: Credentials,
    /// Proxy flag for created records
    proxied: bool,
    /// TTL for created records (1 = automatic)
    ttl: u32,
}

impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_base", &self.api_base)
            .field("credentials", &self.credentials)
            .field("proxied", &self.proxied)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider talking to the public Cloudflare API
    pub fn new(client: reqwest::Client, credentials: Credentials, proxied: bool, ttl: u32) -> Self {
        Self {
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            credentials,
            proxied,
            ttl,
        }
    }

    /// Point the provider at another API base (tests, API gateways)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        self.credentials
            .apply(self.client.request(method, url))
            .header("Content-Type", "application/json")
    }

    /// Send a request and unwrap the v4 envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: request failed: {}", context, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::from_status(PROVIDER, status.as_u16(), context, &body));
        }

        let envelope: CloudflareResponse<T> = response.json().await.map_err(|e| {
            Error::provider(PROVIDER, format!("{}: failed to parse response: {}", context, e))
        })?;

        if !envelope.success {
            let messages: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect();
            return Err(Error::provider(
                PROVIDER,
                format!("{}: {}", context, messages.join(", ")),
            ));
        }

        envelope.result.ok_or_else(|| {
            Error::provider(PROVIDER, format!("{}: response carried no result", context))
        })
    }

    /// Find the zone whose name is exactly `domain`
    async fn zone_id(&self, domain: &str) -> Result<String> {
        tracing::debug!("Looking up zone ID for domain: {}", domain);

        let request = self
            .request(reqwest::Method::GET, "/zones")
            .query(&[("name", domain)]);
        let zones: Vec<Zone> = self.send(request, "zone lookup").await?;

        zones
            .into_iter()
            .find(|z| z.name.eq_ignore_ascii_case(domain))
            .map(|z| z.id)
            .ok_or_else(|| Error::not_found(format!("Zone not found: {}", domain)))
    }

    fn to_remote(&self, record: DnsRecord, zone_id: &str) -> Option<RemoteRecord> {
        let kind: RecordKind = record.record_type.parse().ok()?;
        Some(RemoteRecord {
            id: record.id,
            name: record.name,
            address: record.content,
            kind,
            ttl: record.ttl,
            extra: serde_json::json!({
                "zone_id": zone_id,
                "proxied": record.proxied.unwrap_or(self.proxied),
            }),
        })
    }
}

fn zone_of(record: &RemoteRecord) -> Result<&str> {
    record.extra["zone_id"].as_str().ok_or_else(|| {
        Error::invalid_input(format!("record {} carries no Cloudflare zone id", record.name))
    })
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_records(&self, domain: &str, kind: RecordKind) -> Result<Vec<RemoteRecord>> {
        let zone_id = self.zone_id(domain).await?;
        tracing::info!("Querying records with type: {}", kind);

        let request = self
            .request(
                reqwest::Method::GET,
                &format!("/zones/{}/dns_records", zone_id),
            )
            .query(&[
                ("type", kind.as_str().to_string()),
                ("page", "1".to_string()),
                ("per_page", LIST_PAGE_SIZE.to_string()),
            ]);
        let records: Vec<DnsRecord> = self.send(request, "list records").await?;

        Ok(records
            .into_iter()
            .filter_map(|r| self.to_remote(r, &zone_id))
            .filter(|r| r.kind == kind)
            .collect())
    }

    async fn create_record(&self, record: &NewRecord) -> Result<RemoteRecord> {
        let zone_id = self.zone_id(&record.domain).await?;
        let body = RecordBody {
            record_type: record.kind.as_str(),
            name: &record.name,
            content: record.ip.to_string(),
            ttl: self.ttl,
            proxied: self.proxied,
        };

        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/zones/{}/dns_records", zone_id),
            )
            .json(&body);
        let created: DnsRecord = self.send(request, "create record").await?;

        self.to_remote(created, &zone_id).ok_or_else(|| {
            Error::provider(PROVIDER, format!("created {} with an unexpected type", record.name))
        })
    }

    async fn update_record(&self, existing: &RemoteRecord, new_ip: IpAddr) -> Result<RemoteRecord> {
        let zone_id = zone_of(existing)?;
        let body = RecordBody {
            record_type: existing.kind.as_str(),
            name: &existing.name,
            content: new_ip.to_string(),
            ttl: existing.ttl.unwrap_or(self.ttl),
            proxied: existing.extra["proxied"].as_bool().unwrap_or(self.proxied),
        };

        let request = self
            .request(
                reqwest::Method::PUT,
                &format!("/zones/{}/dns_records/{}", zone_id, existing.id),
            )
            .json(&body);
        let updated: DnsRecord = self.send(request, "update record").await?;

        self.to_remote(updated, zone_id).ok_or_else(|| {
            Error::provider(PROVIDER, format!("updated {} to an unexpected type", existing.name))
        })
    }

    async fn delete_record(&self, record: &RemoteRecord) -> Result<()> {
        let zone_id = zone_of(record)?;
        let request = self.request(
            reqwest::Method::DELETE,
            &format!("/zones/{}/dns_records/{}", zone_id, record.id),
        );
        let _: DeletedRecord = self.send(request, "delete record").await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Cloudflare providers over a shared HTTP client
pub struct CloudflareFactory {
    client: reqwest::Client,
}

impl CloudflareFactory {
    /// Create a factory whose providers share `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Cloudflare {
                email,
                api_key,
                api_token,
                proxied,
                ttl,
                api_base,
            } => {
                let credentials = Credentials::from_parts(
                    email.as_deref(),
                    api_key.as_deref(),
                    api_token.as_deref(),
                )?;

                let mut provider =
                    CloudflareProvider::new(self.client.clone(), credentials, *proxied, *ttl);
                if let Some(base) = api_base {
                    provider = provider.with_api_base(base.as_str());
                }

                tracing::debug!("Created {:?}", provider);
                Ok(Box::new(provider))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use ddns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// ddns_provider_cloudflare::register(&registry, reqwest::Client::new());
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ddns_core::ProviderRegistry, client: reqwest::Client) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory::new(client)));
}
