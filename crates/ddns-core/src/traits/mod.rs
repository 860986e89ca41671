//! Core traits for the DDNS system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`IpSource`]: Discover the current public address
//! - [`DnsProvider`]: Read and write records via provider APIs
//! - [`Resolver`]: Resolve existing hostnames (NXDOMAIN-aware)
//! - [`Notifier`]: Fire-and-forget change notifications

pub mod ip_source;
pub mod dns_provider;
pub mod resolver;
pub mod notifier;

pub use ip_source::{IpSource, IpSourceFactory};
pub use dns_provider::{DnsProvider, DnsProviderFactory};
pub use resolver::{Resolver, Resolution};
pub use notifier::{Notifier, LogNotifier};
