// # IP Source Trait
//
// Defines the interface for discovering the machine's current public address.
//
// ## Implementations
//
// - HTTP echo services: `ddns-ip-http` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::IpSource;
//
// let ip = source.current().await?;
// println!("current address: {ip}");
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::record::IpFamily;

/// Trait for IP source implementations
///
/// The reconciler polls `current()` once per tick; sources never schedule
/// anything themselves.
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O to discover the address
///
/// ## Forbidden Capabilities
/// - ❌ Perform DNS updates (use `DnsProvider`)
/// - ❌ Spawn polling loops (the reconciler owns the tick)
/// - ❌ Cache the address between calls (the reconciler owns last-known IP)
#[async_trait]
pub trait IpSource: Send + Sync {
    /// Get the current IP address
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: The current IP address, of the configured family
    /// - `Err(Error)`: If unable to determine the current IP
    async fn current(&self) -> Result<IpAddr, crate::Error>;

    /// The address family this source reports
    fn family(&self) -> IpFamily;
}

/// Helper trait for constructing IP sources from configuration
pub trait IpSourceFactory: Send + Sync {
    /// Create an IpSource instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this IP source type
    /// - `family`: Address family the source must report
    ///
    /// # Returns
    ///
    /// A boxed IpSource trait object
    fn create(
        &self,
        config: &crate::config::IpSourceConfig,
        family: IpFamily,
    ) -> Result<Box<dyn IpSource>, crate::Error>;
}
