// # AliDNS Provider
//
// Alibaba Cloud DNS (RPC-style API, version 2015-01-09) implementation of
// `DnsProvider`.
//
// ## Implementation Status
//
// - ✅ DescribeDomainRecords / AddDomainRecord / UpdateDomainRecord / DeleteDomainRecord
// - ✅ HMAC-SHA1 request signing (SignatureVersion 1.0)
// - ✅ A and AAAA records, `@` for the apex
// - ❌ NO retry logic (a failed action is retried by the next tick)
// - ❌ NO caching (records are fetched fresh every tick)
//
// ### Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS API calls to the configured endpoint only
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Decide what to create, update or delete (owned by the differ)
//
// ## Security Requirements
//
// - The AccessKey secret NEVER appears in logs or `Debug` output
//
// ## Signing
//
// ```text
// StringToSign = "GET&%2F&" + percent(sorted "k=v" pairs joined by "&")
// Signature    = base64(HMAC-SHA1(secret + "&", StringToSign))
// ```

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use ddns_core::config::ProviderConfig;
use ddns_core::differ::{ROOT_LABEL, fqdn};
use ddns_core::traits::{DnsProvider, DnsProviderFactory};
use ddns_core::{Error, NewRecord, RecordKind, RemoteRecord, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Public AliDNS endpoint
const ALIDNS_ENDPOINT: &str = "https://alidns.aliyuncs.com/";

/// API version every request is signed for
const API_VERSION: &str = "2015-01-09";

/// Records requested per DescribeDomainRecords call
const LIST_PAGE_SIZE: u32 = 500;

const PROVIDER: &str = "alidns";

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainRecordsResponse {
    #[serde(default)]
    total_count: u64,
    domain_records: DomainRecords,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<DomainRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecord {
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    record_type: String,
    value: String,
    #[serde(rename = "TTL", default)]
    ttl: Option<u32>,
    #[serde(default)]
    line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordIdResponse {
    record_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: String,
    message: String,
}

/// AliDNS provider
pub struct AlidnsProvider {
    client: reqwest::Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
    /// TTL for created records
    ttl: u32,
    /// Resolution line for created records
    line: String,
}

impl std::fmt::Debug for AlidnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlidnsProvider")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<REDACTED>")
            .field("ttl", &self.ttl)
            .field("line", &self.line)
            .finish()
    }
}

impl AlidnsProvider {
    /// Create a provider talking to the public AliDNS endpoint
    pub fn new(
        client: reqwest::Client,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        ttl: u32,
        line: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: ALIDNS_ENDPOINT.to_string(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            ttl,
            line: line.into(),
        }
    }

    /// Point the provider at another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Add the common parameters and the signature to `action`'s parameters
    fn signed_params(
        &self,
        action: &str,
        params: &[(&str, String)],
        timestamp: &str,
        nonce: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut all: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        all.insert("Action".to_string(), action.to_string());
        all.insert("Format".to_string(), "JSON".to_string());
        all.insert("Version".to_string(), API_VERSION.to_string());
        all.insert("AccessKeyId".to_string(), self.access_key_id.clone());
        all.insert("SignatureMethod".to_string(), "HMAC-SHA1".to_string());
        all.insert("SignatureVersion".to_string(), "1.0".to_string());
        all.insert("SignatureNonce".to_string(), nonce.to_string());
        all.insert("Timestamp".to_string(), timestamp.to_string());

        let signature = sign(&self.access_key_secret, &string_to_sign("GET", &all))?;
        all.insert("Signature".to_string(), signature);
        Ok(all)
    }

    /// Perform one signed API call
    async fn call<T: DeserializeOwned>(&self, action: &str, params: &[(&str, String)]) -> Result<T> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let query = self.signed_params(action, params, &timestamp, &nonce)?;

        tracing::debug!("AliDNS {}", action);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: request failed: {}", action, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("{}: failed to read response: {}", action, e)))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => format!("{}: {}", err.code, err.message),
                Err(_) => body,
            };
            return Err(Error::from_status(PROVIDER, status.as_u16(), action, &detail));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::provider(PROVIDER, format!("{}: failed to parse response: {}", action, e))
        })
    }

    fn to_remote(&self, record: DomainRecord, domain: &str) -> Option<RemoteRecord> {
        let kind: RecordKind = record.record_type.parse().ok()?;
        Some(RemoteRecord {
            id: record.record_id,
            name: fqdn(&record.rr, domain),
            address: record.value,
            kind,
            ttl: record.ttl,
            extra: serde_json::json!({
                "domain": domain,
                "rr": record.rr,
                "line": record.line.unwrap_or_else(|| self.line.clone()),
            }),
        })
    }
}

/// Percent-encode per RFC 3986 (only `A-Z a-z 0-9 - _ . ~` pass through)
fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Canonical string the signature is computed over
fn string_to_sign(method: &str, params: &BTreeMap<String, String>) -> String {
    let canonical = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method,
        percent_encode("/"),
        percent_encode(&canonical)
    )
}

fn sign(secret: &str, string_to_sign: &str) -> Result<String> {
    let key = format!("{}&", secret);
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| Error::provider(PROVIDER, format!("invalid signing key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn rr_of(record: &RemoteRecord) -> Result<String> {
    if let Some(rr) = record.extra["rr"].as_str() {
        return Ok(rr.to_string());
    }
    // Fall back to stripping the domain from the name.
    let domain = record.extra["domain"].as_str().ok_or_else(|| {
        Error::invalid_input(format!("record {} carries no AliDNS RR", record.name))
    })?;
    if record.name.eq_ignore_ascii_case(domain) {
        return Ok(ROOT_LABEL.to_string());
    }
    record
        .name
        .strip_suffix(&format!(".{}", domain))
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_input(format!("{} is not under {}", record.name, domain)))
}

#[async_trait]
impl DnsProvider for AlidnsProvider {
    async fn list_records(&self, domain: &str, kind: RecordKind) -> Result<Vec<RemoteRecord>> {
        let response: DescribeDomainRecordsResponse = self
            .call(
                "DescribeDomainRecords",
                &[
                    ("DomainName", domain.to_string()),
                    ("Type", kind.as_str().to_string()),
                    ("PageNumber", "1".to_string()),
                    ("PageSize", LIST_PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        if response.total_count > u64::from(LIST_PAGE_SIZE) {
            tracing::warn!(
                "{} has {} records; only the first {} are reconciled",
                domain,
                response.total_count,
                LIST_PAGE_SIZE
            );
        }

        Ok(response
            .domain_records
            .record
            .into_iter()
            .filter_map(|r| self.to_remote(r, domain))
            .filter(|r| r.kind == kind)
            .collect())
    }

    async fn create_record(&self, record: &NewRecord) -> Result<RemoteRecord> {
        let response: RecordIdResponse = self
            .call(
                "AddDomainRecord",
                &[
                    ("DomainName", record.domain.clone()),
                    ("RR", record.label.clone()),
                    ("Type", record.kind.as_str().to_string()),
                    ("Value", record.ip.to_string()),
                    ("TTL", self.ttl.to_string()),
                    ("Line", self.line.clone()),
                ],
            )
            .await?;

        Ok(RemoteRecord {
            id: response.record_id,
            name: record.name.clone(),
            address: record.ip.to_string(),
            kind: record.kind,
            ttl: Some(self.ttl),
            extra: serde_json::json!({
                "domain": record.domain,
                "rr": record.label,
                "line": self.line,
            }),
        })
    }

    async fn update_record(&self, existing: &RemoteRecord, new_ip: IpAddr) -> Result<RemoteRecord> {
        let rr = rr_of(existing)?;
        let ttl = existing.ttl.unwrap_or(self.ttl);
        let line = existing.extra["line"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.line.clone());

        let response: RecordIdResponse = self
            .call(
                "UpdateDomainRecord",
                &[
                    ("RecordId", existing.id.clone()),
                    ("RR", rr),
                    ("Type", existing.kind.as_str().to_string()),
                    ("Value", new_ip.to_string()),
                    ("TTL", ttl.to_string()),
                    ("Line", line),
                ],
            )
            .await?;

        Ok(RemoteRecord {
            id: response.record_id,
            address: new_ip.to_string(),
            ..existing.clone()
        })
    }

    async fn delete_record(&self, record: &RemoteRecord) -> Result<()> {
        let _: RecordIdResponse = self
            .call("DeleteDomainRecord", &[("RecordId", record.id.clone())])
            .await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating AliDNS providers over a shared HTTP client
pub struct AlidnsFactory {
    client: reqwest::Client,
}

impl AlidnsFactory {
    /// Create a factory whose providers share `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl DnsProviderFactory for AlidnsFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Alidns {
                access_key_id,
                access_key_secret,
                ttl,
                line,
                endpoint,
            } => {
                if access_key_id.is_empty() || access_key_secret.is_empty() {
                    return Err(Error::config(
                        "AliDNS requires access_key_id and access_key_secret",
                    ));
                }

                let mut provider = AlidnsProvider::new(
                    self.client.clone(),
                    access_key_id.as_str(),
                    access_key_secret.as_str(),
                    *ttl,
                    line.as_str(),
                );
                if let Some(endpoint) = endpoint {
                    provider = provider.with_endpoint(endpoint.as_str());
                }

                tracing::debug!("Created {:?}", provider);
                Ok(Box::new(provider))
            }
            _ => Err(Error::config("Invalid config for AliDNS provider")),
        }
    }
}

/// Register the AliDNS provider with a registry
pub fn register(registry: &ddns_core::ProviderRegistry, client: reqwest::Client) {
    registry.register_provider(PROVIDER, Box::new(AlidnsFactory::new(client)));
}
