//! Configuration types for the DDNS system
//!
//! This module defines all configuration structures used throughout the crate.
//! The daemon deserializes [`DdnsConfig`] from a JSON file.

use serde::{Deserialize, Serialize};

use crate::differ::{DELETION_MARKER, ROOT_LABEL};
use crate::record::IpFamily;

/// Main DDNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdnsConfig {
    /// DNS provider configuration
    pub provider: ProviderConfig,

    /// Domains to keep in sync, each with its own reconciler
    pub domains: Vec<DomainConfig>,

    /// IP discovery configuration
    #[serde(default)]
    pub ip_source: IpSourceConfig,

    /// Address family managed by every reconciler
    #[serde(default)]
    pub ip_type: IpFamily,

    /// Seconds to sleep between ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Nameserver used to pre-resolve hostnames (enables the NXDOMAIN create path)
    #[serde(default)]
    pub resolver: Option<String>,

    /// Outbound proxy URL (http://, https:// or socks5://)
    #[serde(default)]
    pub proxy: Option<String>,

    /// Route provider and IP discovery traffic through `proxy`
    #[serde(default)]
    pub use_proxy: bool,

    /// Optional webhook notified on address changes
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl DdnsConfig {
    /// Create a configuration for `provider` with defaults and no domains
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            domains: Vec::new(),
            ip_source: IpSourceConfig::default(),
            ip_type: IpFamily::default(),
            interval_secs: default_interval_secs(),
            resolver: None,
            proxy: None,
            use_proxy: false,
            webhook: None,
            engine: EngineConfig::default(),
        }
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.domains.is_empty() {
            return Err(crate::Error::config("No domains configured"));
        }

        for domain in &self.domains {
            domain.validate()?;
        }

        if self.interval_secs == 0 {
            return Err(crate::Error::config("interval_secs must be > 0"));
        }

        if self.use_proxy && self.proxy.as_deref().is_none_or(str::is_empty) {
            return Err(crate::Error::config("use_proxy is set but no proxy URL is configured"));
        }

        if let Some(ref resolver) = self.resolver
            && resolver.trim().is_empty()
        {
            return Err(crate::Error::config("resolver cannot be empty when set"));
        }

        if let Some(ref webhook) = self.webhook
            && webhook.url.is_empty()
        {
            return Err(crate::Error::config("webhook URL cannot be empty"));
        }

        self.provider.validate()?;
        self.ip_source.validate()?;
        self.engine.validate()?;

        Ok(())
    }

    /// The proxy URL to use, if proxying is enabled
    pub fn effective_proxy(&self) -> Option<&str> {
        if self.use_proxy {
            self.proxy.as_deref().filter(|p| !p.is_empty())
        } else {
            None
        }
    }
}

/// One domain and its declarative subdomain list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Bare domain name, e.g. `example.com`
    pub domain_name: String,

    /// Ordered subdomain specifiers: `www`, `@` (apex), `-old` (ensure absent)
    pub sub_domains: Vec<String>,
}

impl DomainConfig {
    /// Create a domain configuration
    pub fn new<I, S>(domain_name: impl Into<String>, sub_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domain_name: domain_name.into(),
            sub_domains: sub_domains.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate the domain name and every specifier
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.domain_name)?;

        if self.sub_domains.is_empty() {
            return Err(crate::Error::config(format!(
                "Domain {} has no sub_domains",
                self.domain_name
            )));
        }

        for spec in &self.sub_domains {
            if let Some(label) = spec.strip_prefix(DELETION_MARKER)
                && self
                    .sub_domains
                    .iter()
                    .any(|other| other.eq_ignore_ascii_case(label.trim_start_matches(DELETION_MARKER)))
            {
                return Err(crate::Error::config(format!(
                    "Domain {} both keeps and deletes '{}'",
                    self.domain_name, label
                )));
            }

            let label = spec.trim_start_matches(DELETION_MARKER);
            if label.is_empty() {
                return Err(crate::Error::config(format!(
                    "Domain {} has an empty subdomain specifier: '{}'",
                    self.domain_name, spec
                )));
            }
            if label != ROOT_LABEL
                && !label
                    .split('.')
                    .all(|part| is_valid_label(part) || part == "*")
            {
                return Err(crate::Error::config(format!(
                    "Domain {} has an invalid subdomain: '{}'",
                    self.domain_name, spec
                )));
            }
        }

        Ok(())
    }
}

/// Validate that a string is a valid domain name
///
/// Basic RFC 1035 checks: total length, label length and characters.
pub fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::config("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(crate::Error::config(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        if !is_valid_label(label) {
            return Err(crate::Error::config(format!(
                "Domain name has an invalid label '{}': {}",
                label, domain
            )));
        }
    }

    Ok(())
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

/// IP source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpSourceConfig {
    /// HTTP echo services, tried in order
    Http {
        /// Service URLs; empty means the adapter's defaults for the family
        #[serde(default)]
        urls: Vec<String>,
        /// Per-request timeout in seconds
        #[serde(default = "default_ip_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom IP source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl IpSourceConfig {
    /// Validate the IP source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            IpSourceConfig::Http { urls, timeout_secs } => {
                if urls.iter().any(|u| u.is_empty()) {
                    return Err(crate::Error::config("HTTP IP source URL cannot be empty"));
                }
                if let Some(bad) = urls
                    .iter()
                    .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
                {
                    return Err(crate::Error::config(format!(
                        "HTTP IP source URL must use HTTP or HTTPS scheme. Got: {}",
                        bad
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("HTTP IP source timeout must be > 0"));
                }
                Ok(())
            }
            IpSourceConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom IP source factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom IP source config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the IP source type name
    pub fn type_name(&self) -> &str {
        match self {
            IpSourceConfig::Http { .. } => "http",
            IpSourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for IpSourceConfig {
    fn default() -> Self {
        IpSourceConfig::Http {
            urls: Vec::new(),
            timeout_secs: default_ip_timeout_secs(),
        }
    }
}

/// DNS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    ///
    /// Authenticates with `api_token` when present, otherwise with the
    /// `email` + `api_key` pair.
    Cloudflare {
        /// Account email (global API key auth)
        #[serde(default)]
        email: Option<String>,
        /// Global API key
        #[serde(default)]
        api_key: Option<String>,
        /// Scoped API token
        #[serde(default)]
        api_token: Option<String>,
        /// Whether created records are proxied
        #[serde(default = "default_cloudflare_proxied")]
        proxied: bool,
        /// TTL for created records (1 = automatic)
        #[serde(default = "default_cloudflare_ttl")]
        ttl: u32,
        /// API base URL override
        #[serde(default)]
        api_base: Option<String>,
    },

    /// Alibaba Cloud DNS provider
    Alidns {
        /// AccessKey ID
        access_key_id: String,
        /// AccessKey secret
        access_key_secret: String,
        /// TTL for created records
        #[serde(default = "default_alidns_ttl")]
        ttl: u32,
        /// Resolution line for created records
        #[serde(default = "default_alidns_line")]
        line: String,
        /// API endpoint override
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare {
                email,
                api_key,
                api_token,
                ..
            } => {
                let has_token = api_token.as_deref().is_some_and(|t| !t.is_empty());
                let has_key_pair = email.as_deref().is_some_and(|e| !e.is_empty())
                    && api_key.as_deref().is_some_and(|k| !k.is_empty());
                if !has_token && !has_key_pair {
                    return Err(crate::Error::config(
                        "Cloudflare requires api_token or both email and api_key",
                    ));
                }
                Ok(())
            }
            ProviderConfig::Alidns {
                access_key_id,
                access_key_secret,
                ..
            } => {
                if access_key_id.is_empty() || access_key_secret.is_empty() {
                    return Err(crate::Error::config(
                        "AliDNS requires access_key_id and access_key_secret",
                    ));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Alidns { .. } => "alidns",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Webhook notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL receiving a JSON POST per change
    pub url: String,
}

/// What to do on a tick whose IP equals the last-known IP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedIpPolicy {
    /// Skip the tick entirely; records edited at the provider drift until
    /// the address changes again
    #[default]
    Skip,
    /// Diff against the provider every tick, correcting drift
    Reconcile,
}

/// Restart policy applied by the supervisor to faulted domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Restarts allowed per domain before it is abandoned
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before the first restart (doubles on each subsequent one)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound for the restart delay
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Uptime after which a domain's restart count starts over; 0 keeps
    /// counting over the domain's whole lifetime
    #[serde(default = "default_healthy_reset_secs")]
    pub healthy_reset_secs: u64,
}

impl RestartPolicy {
    /// Validate the restart policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.backoff_max_secs < self.backoff_base_secs {
            return Err(crate::Error::config(
                "restart.backoff_max_secs must be >= restart.backoff_base_secs",
            ));
        }
        Ok(())
    }

    /// Delay before restart number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let secs = self
            .backoff_base_secs
            .saturating_mul(factor)
            .min(self.backoff_max_secs);
        std::time::Duration::from_secs(secs)
    }

    /// Uptime that clears the restart count, if any
    pub fn healthy_reset(&self) -> Option<std::time::Duration> {
        (self.healthy_reset_secs > 0)
            .then(|| std::time::Duration::from_secs(self.healthy_reset_secs))
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            healthy_reset_secs: default_healthy_reset_secs(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Behavior when the discovered IP equals the last-known IP
    #[serde(default)]
    pub unchanged_ip: UnchangedIpPolicy,

    /// Remove deletion markers whose record no longer exists at the provider
    ///
    /// When false, such markers stay in the list and are re-checked every
    /// pass, so a record re-created later is still removed.
    #[serde(default)]
    pub prune_unmatched_deletions: bool,

    /// Supervisor restart policy
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Capacity of the supervisor event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine section
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("engine.event_channel_capacity must be > 0"));
        }
        self.restart.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unchanged_ip: UnchangedIpPolicy::default(),
            prune_unmatched_deletions: false,
            restart: RestartPolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

fn default_ip_timeout_secs() -> u64 {
    10
}

fn default_cloudflare_proxied() -> bool {
    true
}

fn default_cloudflare_ttl() -> u32 {
    1
}

fn default_alidns_ttl() -> u32 {
    600
}

fn default_alidns_line() -> String {
    "default".to_string()
}

fn default_max_restarts() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_healthy_reset_secs() -> u64 {
    3600
}

fn default_event_channel_capacity() -> usize {
    1000
}
