// # DNS Provider Trait
//
// Defines the interface for reading and writing address records in one
// provider's remote record store.
//
// ## Implementations
//
// - Cloudflare: `ddns-provider-cloudflare` crate
// - AliDNS: `ddns-provider-alidns` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{DnsProvider, RecordKind};
//
// let records = provider.list_records("example.com", RecordKind::A).await?;
// for record in &records {
//     if record.has_name("www.example.com") {
//         provider.update_record(record, "203.0.113.7".parse()?).await?;
//     }
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::record::{NewRecord, RecordKind, RemoteRecord};

/// Trait for DNS provider implementations
///
/// The reconciliation core is written once against this trait; each provider
/// is an adapter.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Return success or failure (the reconciler decides what happens next)
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads
/// - ❌ Implement retry logic or backoff (a failed call is retried on the next tick)
/// - ❌ Cache records between calls
/// - ❌ Decide whether a change is needed (owned by the differ)
///
/// # Idempotence
///
/// Calls are idempotent from the caller's perspective only if the caller
/// re-lists before retrying. Implementations never retry implicitly.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List the records of `kind` for `domain`.
    ///
    /// # Returns
    ///
    /// - `Ok(vec![])` when the provider reports success with zero records
    /// - `Err(Error)` when the call fails or the provider reports an
    ///   unsuccessful status; this is never conflated with "no records"
    async fn list_records(
        &self,
        domain: &str,
        kind: RecordKind,
    ) -> Result<Vec<RemoteRecord>, crate::Error>;

    /// Create a record and return it as stored
    async fn create_record(&self, record: &NewRecord) -> Result<RemoteRecord, crate::Error>;

    /// Point `existing` at `new_ip` and return the record as applied
    async fn update_record(
        &self,
        existing: &RemoteRecord,
        new_ip: IpAddr,
    ) -> Result<RemoteRecord, crate::Error>;

    /// Delete `existing`
    async fn delete_record(&self, existing: &RemoteRecord) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
///
/// Factories are built by the adapter crates' `register()` functions and
/// carry whatever shared transport the adapter needs (e.g. a proxied HTTP
/// client), so the core stays free of an HTTP stack.
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this provider
    ///
    /// # Returns
    ///
    /// A boxed DnsProvider trait object
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
