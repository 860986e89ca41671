// # ddns-core
//
// Core library for the per-domain DDNS reconciler.
//
// ## Architecture Overview
//
// - **IpSource**: Trait for discovering the current public address
// - **DnsProvider**: Trait for listing and editing records via provider APIs
// - **Resolver**: Optional pre-resolution that separates NXDOMAIN from errors
// - **Notifier**: Fire-and-forget sink told about address changes
// - **differ**: Pure function from (desired list, remote records, IP) to actions
// - **DomainReconciler**: Per-domain tick loop owning its list and last-known IP
// - **Supervisor**: One task per domain, fault channel, restart policy
// - **ProviderRegistry**: Plugin-based registry for providers and IP sources
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic never speaks HTTP; adapters do
// 2. **Declarative**: Each tick converges the provider to the configured list
// 3. **Plugin-Based**: Providers are registered dynamically, no hard-coded if-else
// 4. **Isolation**: Domains share no mutable state; a fault stays in its domain

pub mod config;
pub mod differ;
pub mod error;
pub mod reconciler;
pub mod record;
pub mod registry;
pub mod supervisor;
pub mod traits;

// Re-export core types for convenience
pub use config::{DdnsConfig, DomainConfig, IpSourceConfig, ProviderConfig};
pub use error::{Error, Result};
pub use reconciler::{Collaborators, DomainReconciler, ReconcilerSettings, TickOutcome, TickReport};
pub use record::{IpFamily, NewRecord, RecordKind, RemoteRecord};
pub use registry::ProviderRegistry;
pub use supervisor::{DomainFault, Supervisor, SupervisorEvent};
pub use traits::{DnsProvider, IpSource, LogNotifier, Notifier, Resolution, Resolver};
