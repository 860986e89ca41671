// # Resolver Trait
//
// Resolves an existing hostname before the provider is consulted, so a
// missing record can go straight to the create path.
//
// ## Implementations
//
// - hickory-resolver: `ddns-resolver` crate

use async_trait::async_trait;
use std::net::IpAddr;

use crate::record::IpFamily;

/// Outcome of a successful resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The hostname resolves to this address
    Found(IpAddr),
    /// The hostname does not exist (NXDOMAIN or no record of the family)
    NxDomain,
}

/// Trait for DNS resolver implementations
///
/// NXDOMAIN is a distinguished `Ok` outcome, never an `Err`: the former is a
/// valid input to the create path, the latter is not.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `hostname` for `family`
    async fn resolve(&self, hostname: &str, family: IpFamily) -> Result<Resolution, crate::Error>;
}
