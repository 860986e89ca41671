//! Per-domain reconciliation loop
//!
//! A [`DomainReconciler`] owns one domain's desired subdomain list and its
//! last-known IP. Nothing else reads or writes either; the supervisor runs
//! each reconciler on its own task.
//!
//! ## State machine
//!
//! ```text
//!   Idle ──▶ FetchingIP ──┬── failure ──────────────────────────────┐
//!                         ├── unchanged ────────────────────────────┤
//!                         └── changed / first pass                  │
//!                                  │                                ▼
//!                 Resolving ─▶ Listing ─▶ Diffing ─▶ Applying ─▶ Notifying ─▶ Sleeping
//!                                  │                                ▲
//!                                  └── list failure ────────────────┘
//! ```
//!
//! ## Failure handling
//!
//! - IP discovery or listing failure: the tick is skipped, last-known IP
//!   stays as it was
//! - A failed create/update/delete: logged and skipped, the remaining
//!   actions still run, and the next tick retries
//! - A panic: propagates out of [`DomainReconciler::run`]; the supervisor
//!   catches it and decides whether to restart the domain

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{DdnsConfig, DomainConfig, UnchangedIpPolicy};
use crate::differ::{self, Action, Plan, Specifier};
use crate::record::{IpFamily, NewRecord};
use crate::traits::{DnsProvider, IpSource, Notifier, Resolution, Resolver};

/// Shared, read-only collaborators handed to every reconciler
#[derive(Clone)]
pub struct Collaborators {
    /// Current-IP discovery
    pub ip_source: Arc<dyn IpSource>,
    /// Provider record store
    pub provider: Arc<dyn DnsProvider>,
    /// Optional pre-resolution of kept hostnames
    pub resolver: Option<Arc<dyn Resolver>>,
    /// Change notifications
    pub notifier: Arc<dyn Notifier>,
}

/// Per-reconciler settings taken from [`DdnsConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Address family to manage
    pub family: IpFamily,
    /// Sleep between ticks
    pub interval: Duration,
    /// Whether to skip ticks whose IP equals the last-known IP
    pub unchanged_ip: UnchangedIpPolicy,
    /// Remove deletion markers that match nothing remotely
    pub prune_unmatched_deletions: bool,
}

impl ReconcilerSettings {
    /// Extract the reconciler settings from a full configuration
    pub fn from_config(config: &DdnsConfig) -> Self {
        Self {
            family: config.ip_type,
            interval: Duration::from_secs(config.interval_secs),
            unchanged_ip: config.engine.unchanged_ip,
            prune_unmatched_deletions: config.engine.prune_unmatched_deletions,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// IP discovery failed; nothing else ran
    IpUnavailable,
    /// The IP equals the last-known IP; no provider calls were made
    Unchanged(IpAddr),
    /// Listing remote records failed; no actions were computed
    ListFailed,
    /// The plan was applied
    Applied(TickReport),
}

/// Counters for an applied tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Records created
    pub created: usize,
    /// Records updated
    pub updated: usize,
    /// Records deleted
    pub deleted: usize,
    /// Records already correct
    pub unchanged: usize,
    /// Actions that failed
    pub failed: usize,
    /// Hostname passed to the notifier, if a change succeeded
    pub notified: Option<String>,
}

/// One domain's reconciliation loop
pub struct DomainReconciler {
    domain: DomainConfig,
    settings: ReconcilerSettings,
    collaborators: Collaborators,
    last_ip: Option<IpAddr>,
}

impl DomainReconciler {
    /// Create a reconciler; the first tick always performs a full pass
    pub fn new(
        domain: DomainConfig,
        settings: ReconcilerSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            domain,
            settings,
            collaborators,
            last_ip: None,
        }
    }

    /// The domain as currently desired (reflects deletions applied so far)
    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    /// Give the owned domain back (used when reporting a fault)
    pub fn into_domain(self) -> DomainConfig {
        self.domain
    }

    /// The IP recorded after the last fully successful pass
    pub fn last_ip(&self) -> Option<IpAddr> {
        self.last_ip
    }

    /// Run ticks until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting reconciler for {} ({} specifier(s), {})",
            self.domain.domain_name,
            self.domain.sub_domains.len(),
            self.settings.family
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            debug!(
                "Going to sleep, will start next checking in {} seconds...",
                self.settings.interval.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler for {} stopped", self.domain.domain_name);
    }

    /// Execute one pass: fetch IP, diff, apply, notify
    pub async fn tick(&mut self) -> TickOutcome {
        let current_ip = match self.collaborators.ip_source.current().await {
            Ok(ip) if self.settings.family.matches(&ip) => ip,
            Ok(ip) => {
                error!(
                    "IP source returned {} but {} is configured; skipping tick",
                    ip, self.settings.family
                );
                return TickOutcome::IpUnavailable;
            }
            Err(e) => {
                error!("Failed to get current IP: {}", e);
                return TickOutcome::IpUnavailable;
            }
        };
        debug!("Current IP is: {}", current_ip);

        if self.settings.unchanged_ip == UnchangedIpPolicy::Skip
            && self.last_ip == Some(current_ip)
        {
            info!(
                "IP is the same as cached one ({}). Skip update.",
                current_ip
            );
            return TickOutcome::Unchanged(current_ip);
        }

        info!("Checking IP for domain {}", self.domain.domain_name);

        let hints = self.resolve_kept_names().await;

        let records = match self
            .collaborators
            .provider
            .list_records(&self.domain.domain_name, self.settings.family.record_kind())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(
                    "Failed to list records for {} via {}: {}",
                    self.domain.domain_name,
                    self.collaborators.provider.provider_name(),
                    e
                );
                return TickOutcome::ListFailed;
            }
        };

        let plan = differ::plan(
            &self.domain,
            &records,
            current_ip,
            self.settings.family,
            &hints,
        );

        TickOutcome::Applied(self.apply(plan, current_ip).await)
    }

    /// Resolve every kept hostname when a resolver is configured
    async fn resolve_kept_names(&self) -> HashMap<String, Resolution> {
        let mut hints = HashMap::new();
        let Some(resolver) = &self.collaborators.resolver else {
            return hints;
        };

        for raw in &self.domain.sub_domains {
            let spec = Specifier::parse(raw);
            if !matches!(spec, Specifier::Keep(_)) {
                continue;
            }

            let hostname = spec.fqdn(&self.domain.domain_name);
            match resolver.resolve(&hostname, self.settings.family).await {
                Ok(resolution) => {
                    debug!("Resolved {}: {:?}", hostname, resolution);
                    hints.insert(hostname.to_ascii_lowercase(), resolution);
                }
                Err(e) => warn!("Failed to resolve {}: {}", hostname, e),
            }
        }

        hints
    }

    /// Apply `plan` in order; each action is independent of the others
    ///
    /// Deletes come first in every plan. Their specifiers are dropped from
    /// the desired list as soon as the delete phase ends, before any
    /// create or update runs.
    async fn apply(&mut self, plan: Plan, current_ip: IpAddr) -> TickReport {
        let mut report = TickReport::default();
        let (deletes, rest): (Vec<Action>, Vec<Action>) = plan
            .actions
            .into_iter()
            .partition(|a| matches!(a, Action::Delete { .. }));

        self.apply_deletes(deletes, &mut report).await;

        if self.settings.prune_unmatched_deletions {
            for specifier in &plan.unmatched_deletions {
                info!(
                    "No record left for {}, pruning it from {}",
                    specifier, self.domain.domain_name
                );
                self.remove_specifier(specifier);
            }
        } else {
            for specifier in &plan.unmatched_deletions {
                debug!("Nothing to delete for {}", specifier);
            }
        }

        let provider = Arc::clone(&self.collaborators.provider);
        let kind = self.settings.family.record_kind();
        let mut applied_ip = current_ip;
        let mut changed: Option<String> = None;

        for action in rest {
            match action {
                Action::Create { name, label, ip } => {
                    let new_record = NewRecord {
                        domain: self.domain.domain_name.clone(),
                        label,
                        name,
                        ip,
                        kind,
                    };
                    match provider.create_record(&new_record).await {
                        Ok(created) => {
                            info!("Record added: {} -> {}", created.name, created.address);
                            report.created += 1;
                            applied_ip = created.ip().unwrap_or(ip);
                            changed.get_or_insert(new_record.name);
                        }
                        Err(e) => {
                            warn!("Failed to add record {}: {}", new_record.name, e);
                            report.failed += 1;
                        }
                    }
                }
                Action::Update { record, new_ip } => {
                    info!(
                        "IP mismatch: Current({}) vs {}({})",
                        new_ip,
                        provider.provider_name(),
                        record.address
                    );
                    match provider.update_record(&record, new_ip).await {
                        Ok(updated) => {
                            info!("Record updated: {} -> {}", updated.name, updated.address);
                            report.updated += 1;
                            applied_ip = updated.ip().unwrap_or(new_ip);
                            changed.get_or_insert(record.name);
                        }
                        Err(e) => {
                            warn!("Failed to update record {}: {}", record.name, e);
                            report.failed += 1;
                        }
                    }
                }
                Action::NoOp { name } => {
                    info!("Record OK: {} - {}", name, current_ip);
                    report.unchanged += 1;
                }
                // Handled by apply_deletes.
                Action::Delete { .. } => {}
            }
        }

        if report.failed == 0 {
            self.last_ip = Some(applied_ip);
        } else {
            warn!(
                "{} action(s) failed for {}; will retry next tick",
                report.failed, self.domain.domain_name
            );
        }

        if let Some(hostname) = changed {
            let notifier = Arc::clone(&self.collaborators.notifier);
            let target = hostname.clone();
            tokio::spawn(async move {
                notifier.send(&target, applied_ip).await;
            });
            report.notified = Some(hostname);
        }

        report
    }

    /// Run every delete, then drop each specifier whose deletes all succeeded
    async fn apply_deletes(&mut self, deletes: Vec<Action>, report: &mut TickReport) {
        let provider = Arc::clone(&self.collaborators.provider);
        let mut deleted_specs: Vec<String> = Vec::new();
        let mut failed_specs: HashSet<String> = HashSet::new();

        for action in deletes {
            let Action::Delete { record, specifier } = action else {
                continue;
            };
            match provider.delete_record(&record).await {
                Ok(()) => {
                    info!("Record deleted: {}", record.name);
                    report.deleted += 1;
                    if !deleted_specs.contains(&specifier) {
                        deleted_specs.push(specifier);
                    }
                }
                Err(e) => {
                    warn!("Failed to delete record {}: {}", record.name, e);
                    report.failed += 1;
                    failed_specs.insert(specifier);
                }
            }
        }

        for specifier in deleted_specs
            .iter()
            .filter(|s| !failed_specs.contains(*s))
        {
            self.remove_specifier(specifier);
        }
    }

    /// Remove exactly one occurrence of `specifier`, keeping the rest in order
    fn remove_specifier(&mut self, specifier: &str) {
        if let Some(index) = self
            .domain
            .sub_domains
            .iter()
            .position(|s| s == specifier)
        {
            self.domain.sub_domains.remove(index);
        }
    }
}
