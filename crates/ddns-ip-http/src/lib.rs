// # HTTP IP Source
//
// Discovers the public address by asking plain-text echo services
// (e.g. api.ipify.org, icanhazip.com), one URL after another until one
// answers with an address of the configured family.
//
// ## Architecture
//
// Stateless: every `current()` call performs fresh requests. The reconciler
// owns the tick and the last-known IP, so nothing is cached or polled here.

use ddns_core::ProviderRegistry;
use ddns_core::config::IpSourceConfig;
use ddns_core::traits::{IpSource, IpSourceFactory};
use ddns_core::{Error, IpFamily, Result};

use std::net::IpAddr;
use std::time::Duration;

/// Echo services used when no URL is configured (IPv4)
const DEFAULT_IPV4_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ipv4.icanhazip.com",
    "https://ifconfig.me/ip",
];

/// Echo services used when no URL is configured (IPv6)
const DEFAULT_IPV6_SERVICES: &[&str] = &["https://api6.ipify.org", "https://ipv6.icanhazip.com"];

/// HTTP-based IP source
#[derive(Debug, Clone)]
pub struct HttpIpSource {
    /// Services to ask, in order
    urls: Vec<String>,

    /// Family the answer must belong to
    family: IpFamily,

    /// Per-request timeout
    timeout: Duration,

    /// Shared HTTP client (carries the proxy, if any)
    client: reqwest::Client,
}

impl HttpIpSource {
    /// Create a source asking `urls` in order; empty means the family defaults
    pub fn new(
        client: reqwest::Client,
        urls: Vec<String>,
        family: IpFamily,
        timeout: Duration,
    ) -> Self {
        let urls = if urls.is_empty() {
            default_services(family)
                .iter()
                .map(|u| u.to_string())
                .collect()
        } else {
            urls
        };

        Self {
            urls,
            family,
            timeout,
            client,
        }
    }

    /// Services this source will ask
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Fetch and validate the address from one service
    async fn fetch_ip(&self, url: &str) -> Result<IpAddr> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::ip_source(format!("{}: request failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::ip_source(format!(
                "{}: HTTP error: {}",
                url,
                response.status()
            )));
        }

        let ip_text = response
            .text()
            .await
            .map_err(|e| Error::ip_source(format!("{}: failed to read response: {}", url, e)))?;
        let ip_text = ip_text.trim();

        let ip: IpAddr = ip_text
            .parse()
            .map_err(|_| Error::ip_source(format!("{}: invalid IP address: {}", url, ip_text)))?;

        if !self.family.matches(&ip) {
            return Err(Error::ip_source(format!(
                "{}: expected {}, got: {}",
                url, self.family, ip
            )));
        }

        Ok(ip)
    }
}

/// Default echo services for `family`
pub fn default_services(family: IpFamily) -> &'static [&'static str] {
    match family {
        IpFamily::V4 => DEFAULT_IPV4_SERVICES,
        IpFamily::V6 => DEFAULT_IPV6_SERVICES,
    }
}

#[async_trait::async_trait]
impl IpSource for HttpIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let mut failures = Vec::new();

        for url in &self.urls {
            match self.fetch_ip(url).await {
                Ok(ip) => {
                    tracing::debug!("{} reported {}", url, ip);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    failures.push(e.to_string());
                }
            }
        }

        Err(Error::ip_source(format!(
            "no echo service returned an {} address ({})",
            self.family,
            failures.join("; ")
        )))
    }

    fn family(&self) -> IpFamily {
        self.family
    }
}

/// Factory for creating HTTP IP sources over a shared HTTP client
pub struct HttpFactory {
    client: reqwest::Client,
}

impl HttpFactory {
    /// Create a factory whose sources share `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl IpSourceFactory for HttpFactory {
    fn create(&self, config: &IpSourceConfig, family: IpFamily) -> Result<Box<dyn IpSource>> {
        match config {
            IpSourceConfig::Http { urls, timeout_secs } => Ok(Box::new(HttpIpSource::new(
                self.client.clone(),
                urls.clone(),
                family,
                Duration::from_secs(*timeout_secs),
            ))),
            _ => Err(Error::config("Invalid config for HTTP IP source")),
        }
    }
}

/// Register the HTTP IP source with a registry
pub fn register(registry: &ProviderRegistry, client: reqwest::Client) {
    registry.register_ip_source("http", Box::new(HttpFactory::new(client)));
}
