//! Test doubles and common utilities for contract tests
//!
//! The doubles keep their state behind `Arc`s so a test can hold one handle
//! while the reconciler owns another.

#![allow(dead_code)]

use async_trait::async_trait;
use ddns_core::config::{DdnsConfig, DomainConfig, ProviderConfig, UnchangedIpPolicy};
use ddns_core::error::{Error, Result};
use ddns_core::reconciler::{Collaborators, ReconcilerSettings};
use ddns_core::record::{IpFamily, NewRecord, RecordKind, RemoteRecord};
use ddns_core::traits::{DnsProvider, IpSource, Notifier, Resolution, Resolver};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid test IP")
}

/// An A record as the mock provider would store it
pub fn a_record(id: &str, name: &str, address: &str) -> RemoteRecord {
    RemoteRecord {
        id: id.to_string(),
        name: name.to_string(),
        address: address.to_string(),
        kind: RecordKind::A,
        ttl: Some(600),
        extra: serde_json::Value::Null,
    }
}

pub fn domain(name: &str, specifiers: &[&str]) -> DomainConfig {
    DomainConfig::new(name, specifiers.iter().copied())
}

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        family: IpFamily::V4,
        interval: Duration::from_secs(60),
        unchanged_ip: UnchangedIpPolicy::Skip,
        prune_unmatched_deletions: false,
    }
}

/// A valid configuration using a custom provider, for supervisor tests
pub fn config(domains: Vec<DomainConfig>) -> DdnsConfig {
    let mut config = DdnsConfig::new(ProviderConfig::Custom {
        factory: "mock".to_string(),
        config: serde_json::json!({}),
    });
    config.domains = domains;
    config.interval_secs = 60;
    config
}

// ---------------------------------------------------------------------------
// IP source
// ---------------------------------------------------------------------------

/// An IP source whose answer the test can change between ticks
#[derive(Clone)]
pub struct ScriptedIpSource {
    current: Arc<Mutex<IpAddr>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedIpSource {
    pub fn new(current: IpAddr) -> Self {
        Self {
            current: Arc::new(Mutex::new(current)),
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, ip: IpAddr) {
        *self.current.lock().unwrap() = ip;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IpSource for ScriptedIpSource {
    async fn current(&self) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ip_source("echo service unreachable"));
        }
        Ok(*self.current.lock().unwrap())
    }

    fn family(&self) -> IpFamily {
        IpFamily::V4
    }
}

// ---------------------------------------------------------------------------
// DNS provider
// ---------------------------------------------------------------------------

/// One call observed by [`MockDnsProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String),
    Create(String, IpAddr),
    Update(String, IpAddr),
    Delete(String),
}

/// An in-memory record store that records every call
#[derive(Clone, Default)]
pub struct MockDnsProvider {
    records: Arc<Mutex<Vec<RemoteRecord>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<AtomicUsize>,
    fail_list: Arc<AtomicBool>,
    failing_names: Arc<Mutex<HashSet<String>>>,
    panicking_domains: Arc<Mutex<HashSet<String>>>,
    panic_once_names: Arc<Mutex<HashSet<String>>>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<RemoteRecord>) -> Self {
        let provider = Self::new();
        *provider.records.lock().unwrap() = records;
        provider
    }

    pub fn records(&self) -> Vec<RemoteRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than listing
    pub fn write_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_)))
            .collect()
    }

    /// Change a stored address behind the reconciler's back
    pub fn tamper(&self, name: &str, address: &str) {
        for record in self.records.lock().unwrap().iter_mut() {
            if record.name == name {
                record.address = address.to_string();
            }
        }
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every list call fail until reset
    pub fn set_list_failing(&self, failing: bool) {
        self.fail_list.store(failing, Ordering::SeqCst);
    }

    /// Make create/update/delete of `name` fail
    pub fn fail_writes_for(&self, name: &str) {
        self.failing_names.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self) {
        self.failing_names.lock().unwrap().clear();
        self.fail_list.store(false, Ordering::SeqCst);
    }

    /// Panic inside every list call for `domain`
    pub fn panic_on_list_for(&self, domain: &str) {
        self.panicking_domains
            .lock()
            .unwrap()
            .insert(domain.to_string());
    }

    /// Panic inside the next update of `name` only
    pub fn panic_once_on_update_of(&self, name: &str) {
        self.panic_once_names
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    fn record_call(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.failing_names.lock().unwrap().contains(name) {
            return Err(Error::provider("mock", format!("write to {name} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    async fn list_records(&self, domain: &str, kind: RecordKind) -> Result<Vec<RemoteRecord>> {
        self.record_call(Call::List(domain.to_string()));

        let armed = self.panicking_domains.lock().unwrap().contains(domain);
        if armed {
            panic!("mock provider exploded while listing {domain}");
        }

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::from_status("mock", 500, "list records", "internal error"));
        }

        let suffix = format!(".{domain}");
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind && (r.name == domain || r.name.ends_with(&suffix)))
            .cloned()
            .collect())
    }

    async fn create_record(&self, record: &NewRecord) -> Result<RemoteRecord> {
        self.record_call(Call::Create(record.name.clone(), record.ip));
        self.check_writable(&record.name)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = RemoteRecord {
            id: format!("new-{id}"),
            name: record.name.clone(),
            address: record.ip.to_string(),
            kind: record.kind,
            ttl: Some(600),
            extra: serde_json::Value::Null,
        };
        self.records.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_record(&self, existing: &RemoteRecord, new_ip: IpAddr) -> Result<RemoteRecord> {
        self.record_call(Call::Update(existing.name.clone(), new_ip));
        let armed = self.panic_once_names.lock().unwrap().remove(&existing.name);
        if armed {
            panic!("mock provider exploded while updating {}", existing.name);
        }
        self.check_writable(&existing.name)?;

        let mut records = self.records.lock().unwrap();
        let stored = records
            .iter_mut()
            .find(|r| r.id == existing.id)
            .ok_or_else(|| Error::not_found(format!("record {}", existing.id)))?;
        stored.address = new_ip.to_string();
        Ok(stored.clone())
    }

    async fn delete_record(&self, record: &RemoteRecord) -> Result<()> {
        self.record_call(Call::Delete(record.name.clone()));
        self.check_writable(&record.name)?;

        self.records.lock().unwrap().retain(|r| r.id != record.id);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// A resolver answering from a fixed table; unknown names are errors
#[derive(Clone, Default)]
pub struct MockResolver {
    answers: Arc<Mutex<HashMap<String, Resolution>>>,
    calls: Arc<AtomicUsize>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, hostname: &str, resolution: Resolution) {
        self.answers
            .lock()
            .unwrap()
            .insert(hostname.to_string(), resolution);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn resolve(&self, hostname: &str, _family: IpFamily) -> Result<Resolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .get(hostname)
            .copied()
            .ok_or_else(|| Error::resolver(format!("SERVFAIL for {hostname}")))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// A notifier forwarding every message to a channel
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<(String, IpAddr)>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, IpAddr)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, hostname: &str, ip: IpAddr) {
        let _ = self.tx.send((hostname.to_string(), ip));
    }
}

/// Wire the doubles together; the notifier receiver is returned for assertions
pub fn collaborators(
    ip_source: &ScriptedIpSource,
    provider: &MockDnsProvider,
    resolver: Option<&MockResolver>,
) -> (Collaborators, mpsc::UnboundedReceiver<(String, IpAddr)>) {
    let (notifier, rx) = RecordingNotifier::new();
    let collaborators = Collaborators {
        ip_source: Arc::new(ip_source.clone()),
        provider: Arc::new(provider.clone()),
        resolver: resolver.map(|r| Arc::new(r.clone()) as Arc<dyn Resolver>),
        notifier: Arc::new(notifier),
    };
    (collaborators, rx)
}

/// Receive the next notification, failing the test if none arrives
pub async fn next_notification(
    rx: &mut mpsc::UnboundedReceiver<(String, IpAddr)>,
) -> (String, IpAddr) {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("notification within 60s")
        .expect("notifier channel open")
}
