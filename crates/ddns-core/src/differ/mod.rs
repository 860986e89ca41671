//! Record differ
//!
//! Pure mapping from (desired subdomain list, remote records, current IP) to
//! the actions that converge the provider onto the list. No I/O happens
//! here; the reconciler executes the resulting [`Plan`].
//!
//! ## Specifiers
//!
//! ```text
//! www      keep    www.example.com pointed at the current IP
//! @        keep    example.com (the apex) pointed at the current IP
//! -old     delete  old.example.com, then drop "-old" from the list
//! ```
//!
//! ## Ordering
//!
//! All deletes come first (in list order), then one or more actions per kept
//! entry in list order. Records no specifier refers to are never touched.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::config::DomainConfig;
use crate::record::{IpFamily, RemoteRecord, names_equal};
use crate::traits::Resolution;

/// Prefix marking a specifier as "ensure absent"
pub const DELETION_MARKER: char = '-';

/// Reserved label for the domain apex
pub const ROOT_LABEL: &str = "@";

/// A parsed subdomain specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier<'a> {
    /// Keep the record and point it at the current IP
    Keep(&'a str),
    /// Remove the record
    Delete(&'a str),
}

impl<'a> Specifier<'a> {
    /// Parse a raw specifier; every leading marker is stripped from deletes
    pub fn parse(raw: &'a str) -> Self {
        if raw.starts_with(DELETION_MARKER) {
            Specifier::Delete(raw.trim_start_matches(DELETION_MARKER))
        } else {
            Specifier::Keep(raw)
        }
    }

    /// The label without any marker
    pub fn label(&self) -> &'a str {
        match self {
            Specifier::Keep(label) | Specifier::Delete(label) => label,
        }
    }

    /// Fully-qualified name of this specifier under `domain`
    pub fn fqdn(&self, domain: &str) -> String {
        fqdn(self.label(), domain)
    }
}

/// Fully-qualified name for `label` under `domain`; `@` is the bare domain
pub fn fqdn(label: &str, domain: &str) -> String {
    if label == ROOT_LABEL {
        domain.to_string()
    } else {
        format!("{label}.{domain}")
    }
}

/// A single reconciliation step
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create `name` (subdomain `label`) pointing at `ip`
    Create {
        name: String,
        label: String,
        ip: IpAddr,
    },
    /// Point `record` at `new_ip`
    Update { record: RemoteRecord, new_ip: IpAddr },
    /// Remove `record`; `specifier` is the raw list entry that asked for it
    Delete {
        record: RemoteRecord,
        specifier: String,
    },
    /// `name` already points at the current IP
    NoOp { name: String },
}

impl Action {
    /// Fully-qualified name this action concerns
    pub fn name(&self) -> &str {
        match self {
            Action::Create { name, .. } | Action::NoOp { name } => name,
            Action::Update { record, .. } | Action::Delete { record, .. } => &record.name,
        }
    }

    /// Whether executing this action calls the provider
    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp { .. })
    }
}

/// Output of one diff
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Actions in execution order
    pub actions: Vec<Action>,
    /// Raw deletion specifiers with no matching remote record
    pub unmatched_deletions: Vec<String>,
}

impl Plan {
    /// Whether any action needs a provider call
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| !a.is_noop())
    }
}

/// Diff `domain`'s desired list against `remote`.
///
/// `hints` maps lower-cased FQDNs to resolver outcomes; an `NxDomain` hint
/// forces a create regardless of what the provider listed. Records of the
/// wrong kind for `family` are ignored.
pub fn plan(
    domain: &DomainConfig,
    remote: &[RemoteRecord],
    current_ip: IpAddr,
    family: IpFamily,
    hints: &HashMap<String, Resolution>,
) -> Plan {
    let kind = family.record_kind();
    let remote: Vec<&RemoteRecord> = remote.iter().filter(|r| r.kind == kind).collect();

    let mut plan = Plan::default();
    let mut deleted_ids = HashSet::new();

    for raw in &domain.sub_domains {
        let spec = Specifier::parse(raw);
        let Specifier::Delete(_) = spec else { continue };

        let name = spec.fqdn(&domain.domain_name);
        let records = matching(&remote, &name);
        if records.is_empty() {
            plan.unmatched_deletions.push(raw.clone());
            continue;
        }

        for record in records {
            if deleted_ids.insert(record.id.as_str()) {
                plan.actions.push(Action::Delete {
                    record: record.clone(),
                    specifier: raw.clone(),
                });
            }
        }
    }

    let mut kept: Vec<String> = Vec::new();

    for raw in &domain.sub_domains {
        let spec = Specifier::parse(raw);
        let Specifier::Keep(label) = spec else { continue };

        let name = spec.fqdn(&domain.domain_name);
        if kept.iter().any(|seen| names_equal(seen, &name)) {
            continue;
        }
        kept.push(name.clone());

        if let Some(Resolution::NxDomain) = hints.get(&name.to_ascii_lowercase()) {
            plan.actions.push(Action::Create {
                name,
                label: label.to_string(),
                ip: current_ip,
            });
            continue;
        }

        let records: Vec<&RemoteRecord> = matching(&remote, &name)
            .into_iter()
            .filter(|r| !deleted_ids.contains(r.id.as_str()))
            .collect();

        if records.is_empty() {
            plan.actions.push(Action::Create {
                name,
                label: label.to_string(),
                ip: current_ip,
            });
            continue;
        }

        let stale: Vec<&RemoteRecord> = records
            .into_iter()
            .filter(|r| !r.points_to(current_ip))
            .collect();

        if stale.is_empty() {
            plan.actions.push(Action::NoOp { name });
        } else {
            plan.actions.extend(stale.into_iter().map(|record| Action::Update {
                record: record.clone(),
                new_ip: current_ip,
            }));
        }
    }

    plan
}

fn matching<'r>(remote: &[&'r RemoteRecord], name: &str) -> Vec<&'r RemoteRecord> {
    remote.iter().copied().filter(|r| r.has_name(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;

    fn record(id: &str, name: &str, address: &str) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            kind: RecordKind::A,
            ttl: Some(1),
            extra: serde_json::Value::Null,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn no_hints() -> HashMap<String, Resolution> {
        HashMap::new()
    }

    /// Play a plan against a remote record set the way a provider would.
    fn apply(remote: &mut Vec<RemoteRecord>, plan: &Plan) {
        for (n, action) in plan.actions.iter().enumerate() {
            match action {
                Action::Create { name, ip, .. } => {
                    remote.push(record(&format!("new-{n}"), name, &ip.to_string()))
                }
                Action::Update { record, new_ip } => {
                    if let Some(r) = remote.iter_mut().find(|r| r.id == record.id) {
                        r.address = new_ip.to_string();
                    }
                }
                Action::Delete { record, .. } => remote.retain(|r| r.id != record.id),
                Action::NoOp { .. } => {}
            }
        }
    }

    #[test]
    fn specifier_parsing() {
        assert_eq!(Specifier::parse("www"), Specifier::Keep("www"));
        assert_eq!(Specifier::parse("-old"), Specifier::Delete("old"));
        assert_eq!(Specifier::parse("--old"), Specifier::Delete("old"));
        assert_eq!(Specifier::parse("@"), Specifier::Keep("@"));
        assert_eq!(Specifier::parse("-@"), Specifier::Delete("@"));
    }

    #[test]
    fn root_label_is_bare_domain() {
        assert_eq!(fqdn("@", "example.com"), "example.com");
        assert_eq!(fqdn("www", "example.com"), "www.example.com");
        assert_eq!(Specifier::parse("-@").fqdn("example.com"), "example.com");
    }

    #[test]
    fn deletes_precede_updates() {
        let domain = DomainConfig::new("example.com", ["www", "-old"]);
        let remote = vec![
            record("1", "www.example.com", "1.1.1.1"),
            record("2", "old.example.com", "2.2.2.2"),
        ];

        let plan = plan(&domain, &remote, ip("3.3.3.3"), IpFamily::V4, &no_hints());

        assert_eq!(
            plan.actions,
            vec![
                Action::Delete {
                    record: remote[1].clone(),
                    specifier: "-old".to_string(),
                },
                Action::Update {
                    record: remote[0].clone(),
                    new_ip: ip("3.3.3.3"),
                },
            ]
        );
        assert!(plan.unmatched_deletions.is_empty());
    }

    #[test]
    fn apex_is_created_when_missing() {
        let domain = DomainConfig::new("example.com", ["@"]);

        let plan = plan(&domain, &[], ip("5.5.5.5"), IpFamily::V4, &no_hints());

        assert_eq!(
            plan.actions,
            vec![Action::Create {
                name: "example.com".to_string(),
                label: "@".to_string(),
                ip: ip("5.5.5.5"),
            }]
        );
    }

    #[test]
    fn unmatched_deletion_emits_nothing() {
        let domain = DomainConfig::new("example.com", ["-gone"]);
        let remote = vec![record("1", "www.example.com", "1.1.1.1")];

        let plan = plan(&domain, &remote, ip("1.1.1.1"), IpFamily::V4, &no_hints());

        assert!(plan.actions.is_empty());
        assert_eq!(plan.unmatched_deletions, vec!["-gone".to_string()]);
    }

    #[test]
    fn orphan_records_are_untouched() {
        let domain = DomainConfig::new("example.com", ["www"]);
        let remote = vec![
            record("1", "www.example.com", "9.9.9.9"),
            record("2", "mail.example.com", "9.9.9.9"),
        ];

        let plan = plan(&domain, &remote, ip("1.1.1.1"), IpFamily::V4, &no_hints());

        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].name(), "www.example.com");
    }

    #[test]
    fn matching_address_is_noop() {
        let domain = DomainConfig::new("example.com", ["www"]);
        let remote = vec![record("1", "www.example.com", "1.1.1.1")];

        let plan = plan(&domain, &remote, ip("1.1.1.1"), IpFamily::V4, &no_hints());

        assert_eq!(
            plan.actions,
            vec![Action::NoOp {
                name: "www.example.com".to_string()
            }]
        );
        assert!(!plan.has_changes());
    }

    #[test]
    fn nxdomain_hint_forces_create() {
        let domain = DomainConfig::new("example.com", ["new"]);
        let remote = vec![record("1", "new.example.com", "7.7.7.7")];
        let hints = HashMap::from([("new.example.com".to_string(), Resolution::NxDomain)]);

        let plan = plan(&domain, &remote, ip("7.7.7.7"), IpFamily::V4, &hints);

        assert_eq!(
            plan.actions,
            vec![Action::Create {
                name: "new.example.com".to_string(),
                label: "new".to_string(),
                ip: ip("7.7.7.7"),
            }]
        );
    }

    #[test]
    fn found_hint_defers_to_remote_list() {
        let domain = DomainConfig::new("example.com", ["www"]);
        let remote = vec![record("1", "www.example.com", "1.1.1.1")];
        let hints = HashMap::from([(
            "www.example.com".to_string(),
            Resolution::Found(ip("1.1.1.1")),
        )]);

        let plan = plan(&domain, &remote, ip("2.2.2.2"), IpFamily::V4, &hints);

        assert!(matches!(plan.actions[0], Action::Update { .. }));
    }

    #[test]
    fn only_stale_duplicates_are_updated() {
        let domain = DomainConfig::new("example.com", ["www"]);
        let remote = vec![
            record("1", "www.example.com", "1.1.1.1"),
            record("2", "www.example.com", "4.4.4.4"),
        ];

        let plan = plan(&domain, &remote, ip("4.4.4.4"), IpFamily::V4, &no_hints());

        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(&plan.actions[0], Action::Update { record, .. } if record.id == "1"));
    }

    #[test]
    fn wrong_kind_records_are_ignored() {
        let domain = DomainConfig::new("example.com", ["www"]);
        let mut aaaa = record("1", "www.example.com", "2001:db8::1");
        aaaa.kind = RecordKind::Aaaa;

        let plan = plan(&domain, &[aaaa], ip("1.1.1.1"), IpFamily::V4, &no_hints());

        assert!(matches!(plan.actions[0], Action::Create { .. }));
    }

    #[test]
    fn repeated_specifiers_plan_once() {
        let domain = DomainConfig::new("example.com", ["www", "WWW"]);

        let plan = plan(&domain, &[], ip("1.1.1.1"), IpFamily::V4, &no_hints());

        assert_eq!(plan.actions.len(), 1);
    }

    #[test]
    fn second_pass_is_all_noops() {
        let mut domain = DomainConfig::new("example.com", ["www", "@", "api", "-old"]);
        let mut remote = vec![
            record("1", "www.example.com", "1.1.1.1"),
            record("2", "old.example.com", "2.2.2.2"),
            record("3", "example.com", "3.3.3.3"),
        ];
        let current = ip("8.8.4.4");

        let first = plan(&domain, &remote, current, IpFamily::V4, &no_hints());
        assert!(first.has_changes());
        apply(&mut remote, &first);
        domain.sub_domains.retain(|s| s != "-old");

        let second = plan(&domain, &remote, current, IpFamily::V4, &no_hints());
        assert_eq!(second.actions.len(), 3);
        assert!(second.actions.iter().all(Action::is_noop));
    }
}
