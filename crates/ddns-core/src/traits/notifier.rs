// # Notifier Trait
//
// Fire-and-forget sink told about every successful address change.
//
// ## Implementations
//
// - [`LogNotifier`]: writes the change to the log (default)
// - Webhook: `ddns-notify` crate

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for change notification sinks
///
/// `send` has no failure channel: implementations log their own errors and
/// the reconciler never observes them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce that `hostname` now points at `ip`
    async fn send(&self, hostname: &str, ip: IpAddr);
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, hostname: &str, ip: IpAddr) {
        tracing::info!("IP changed: {} -> {}", hostname, ip);
    }
}
