//! Record and address-family types shared by the differ, the reconciler and
//! the provider adapters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Address family managed by a reconciler.
///
/// Exactly one family is active per configuration; it decides whether A or
/// AAAA records are targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IpFamily {
    #[default]
    #[serde(rename = "IPv4", alias = "ipv4", alias = "v4")]
    V4,
    #[serde(rename = "IPv6", alias = "ipv6", alias = "v6")]
    V6,
}

impl IpFamily {
    /// The address record kind for this family
    pub fn record_kind(self) -> RecordKind {
        match self {
            IpFamily::V4 => RecordKind::A,
            IpFamily::V6 => RecordKind::Aaaa,
        }
    }

    /// Whether `ip` belongs to this family
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// DNS address record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordKind {
    /// Wire name used by provider APIs
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordKind::A),
            "AAAA" => Ok(RecordKind::Aaaa),
            other => Err(crate::Error::invalid_input(format!(
                "unsupported record kind: {other}"
            ))),
        }
    }
}

/// A record as stored at the provider.
///
/// Fetched fresh every tick and never cached beyond it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Fully-qualified record name
    pub name: String,
    /// Address exactly as the provider reports it
    pub address: String,
    /// A or AAAA
    pub kind: RecordKind,
    /// Time-to-live, when the provider reports one
    pub ttl: Option<u32>,
    /// Provider-specific metadata (zone id, proxy flag, RR, line, ...)
    pub extra: serde_json::Value,
}

impl RemoteRecord {
    /// The stored address parsed as an IP, if it is one
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.trim().parse().ok()
    }

    /// Whether the stored address equals `ip`
    pub fn points_to(&self, ip: IpAddr) -> bool {
        match self.ip() {
            Some(stored) => stored == ip,
            None => self.address.trim() == ip.to_string(),
        }
    }

    /// Whether this record's name is `fqdn`.
    ///
    /// DNS names compare case-insensitively and providers differ on whether
    /// they echo the trailing root dot.
    pub fn has_name(&self, fqdn: &str) -> bool {
        names_equal(&self.name, fqdn)
    }
}

/// A record to be created at the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Bare domain (zone) name, e.g. `example.com`
    pub domain: String,
    /// Subdomain label, `@` for the apex
    pub label: String,
    /// Fully-qualified name
    pub name: String,
    /// Address to publish
    pub ip: IpAddr,
    /// A or AAAA
    pub kind: RecordKind,
}

pub(crate) fn names_equal(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
