//! Plugin-based provider registry
//!
//! DNS providers and IP sources register a factory under a type name; the
//! daemon looks the factory up from the `type` tag of its configuration, so
//! adding a provider never touches the core.
//!
//! ## Registration
//!
//! Adapter crates expose a `register` function:
//!
//! ```rust,ignore
//! // In ddns-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry, client: reqwest::Client) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory::new(client)));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::config::{IpSourceConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::record::IpFamily;
use crate::traits::{DnsProvider, DnsProviderFactory, IpSource, IpSourceFactory};

/// Registry of provider and IP source factories, keyed by type name
///
/// Uses interior mutability with RwLock, so registration works through a
/// shared reference.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
    ip_sources: RwLock<HashMap<String, Box<dyn IpSourceFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory under `name` (e.g. "cloudflare")
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Register an IP source factory under `name` (e.g. "http")
    pub fn register_ip_source(&self, name: impl Into<String>, factory: Box<dyn IpSourceFactory>) {
        self.ip_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.type_name();
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Create an IP source reporting `family` from configuration
    pub fn create_ip_source(
        &self,
        config: &IpSourceConfig,
        family: IpFamily,
    ) -> Result<Box<dyn IpSource>> {
        let source_type = config.type_name();
        let sources = self.ip_sources.read().unwrap_or_else(PoisonError::into_inner);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown IP source type: {}", source_type)))?;

        factory.create(config, family)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered IP source types
    pub fn list_ip_sources(&self) -> Vec<String> {
        let sources = self.ip_sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = sources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if an IP source type is registered
    pub fn has_ip_source(&self, name: &str) -> bool {
        self.ip_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingProviderFactory;

    impl DnsProviderFactory for RefusingProviderFactory {
        fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
            Err(Error::not_found("refusing provider"))
        }
    }

    fn custom(factory: &str) -> ProviderConfig {
        ProviderConfig::Custom {
            factory: factory.to_string(),
            config: serde_json::json!({}),
        }
    }

    #[test]
    fn registration_is_visible() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_provider("refusing"));

        registry.register_provider("refusing", Box::new(RefusingProviderFactory));

        assert!(registry.has_provider("refusing"));
        assert_eq!(registry.list_providers(), vec!["refusing".to_string()]);
        assert!(registry.list_ip_sources().is_empty());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let registry = ProviderRegistry::new();
        let err = registry.create_provider(&custom("missing")).err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[test]
    fn factory_errors_propagate() {
        let registry = ProviderRegistry::new();
        registry.register_provider("refusing", Box::new(RefusingProviderFactory));

        let err = registry.create_provider(&custom("refusing")).err();
        assert!(matches!(err, Some(Error::NotFound(_))));
    }

    #[test]
    fn unknown_ip_source_is_a_config_error() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create_ip_source(&IpSourceConfig::default(), IpFamily::V4)
            .err();
        assert!(matches!(err, Some(Error::Config(_))));
    }
}
