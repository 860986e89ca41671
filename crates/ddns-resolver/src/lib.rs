// # Hostname Resolver
//
// `Resolver` implementation on top of hickory-resolver.
//
// Queries the configured nameserver. Answers are never cached: every tick
// must see what the nameserver currently says.
//
// ## Outcomes
//
// - Found: first address of the requested family
// - NxDomain: NXDOMAIN, or NOERROR with no record of that family
// - Err: timeouts, SERVFAIL, REFUSED and every other RCODE, malformed
//   nameserver config

use async_trait::async_trait;
use ddns_core::traits::{Resolution, Resolver};
use ddns_core::{Error, IpFamily, Result};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Port used when the nameserver is given as a bare IP
const DNS_PORT: u16 = 53;

/// Per-query timeout
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// hickory-backed resolver
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
    nameserver: SocketAddr,
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver")
            .field("nameserver", &self.nameserver)
            .finish()
    }
}

impl HickoryResolver {
    /// Resolver that queries `nameserver` (`"1.1.1.1"` or `"1.1.1.1:5353"`)
    pub fn with_nameserver(nameserver: &str) -> Result<Self> {
        Self::with_timeout(nameserver, QUERY_TIMEOUT)
    }

    fn with_timeout(nameserver: &str, timeout: Duration) -> Result<Self> {
        let addr = parse_nameserver(nameserver)?;
        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);
        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, options(timeout)),
            nameserver: addr,
        })
    }
}

fn options(timeout: Duration) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.use_hosts_file = false;
    opts
}

fn parse_nameserver(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| Error::config(format!("invalid resolver address: {}", raw)))
}

/// Map a lookup failure onto the resolver contract
///
/// hickory reports SERVFAIL and REFUSED as `NoRecordsFound` too, so only the
/// response code tells a missing name from a broken nameserver.
fn classify(hostname: &str, err: ResolveError) -> Result<Resolution> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if matches!(response_code, ResponseCode::NXDomain | ResponseCode::NoError) =>
        {
            Ok(Resolution::NxDomain)
        }
        _ => Err(Error::resolver(format!("{}: {}", hostname, err))),
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn resolve(&self, hostname: &str, family: IpFamily) -> Result<Resolution> {
        // Absolute name so search domains never apply.
        let query = format!("{}.", hostname.trim_end_matches('.'));

        let first = match family {
            IpFamily::V4 => self
                .inner
                .ipv4_lookup(query.as_str())
                .await
                .map(|lookup| lookup.iter().next().map(|a| IpAddr::V4(a.0))),
            IpFamily::V6 => self
                .inner
                .ipv6_lookup(query.as_str())
                .await
                .map(|lookup| lookup.iter().next().map(|aaaa| IpAddr::V6(aaaa.0))),
        };

        match first {
            Ok(Some(ip)) => {
                tracing::debug!("{} resolves to {}", hostname, ip);
                Ok(Resolution::Found(ip))
            }
            Ok(None) => Ok(Resolution::NxDomain),
            Err(e) => {
                let outcome = classify(hostname, e);
                if let Ok(Resolution::NxDomain) = outcome {
                    tracing::debug!("{} does not exist", hostname);
                }
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    /// Loopback nameserver answering every query with `rcode` and no records
    async fn spawn_nameserver(rcode: u8) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                if let Some(reply) = empty_reply(&buf[..len], rcode) {
                    let _ = socket.send_to(&reply, peer).await;
                }
            }
        });

        addr
    }

    /// Header with the query's ID and the given RCODE, question echoed back
    fn empty_reply(query: &[u8], rcode: u8) -> Option<Vec<u8>> {
        if query.len() < 12 {
            return None;
        }

        // QNAME labels end at a zero byte, then QTYPE and QCLASS.
        let mut end = 12;
        while *query.get(end)? != 0 {
            end += 1 + query[end] as usize;
        }
        end += 1 + 4;
        if end > query.len() {
            return None;
        }

        let mut reply = Vec::with_capacity(end);
        reply.extend_from_slice(&query[0..2]);
        reply.push(0x80 | (query[2] & 0x79));
        reply.push(0x80 | (rcode & 0x0f));
        reply.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        reply.extend_from_slice(&query[12..end]);
        Some(reply)
    }

    #[test]
    fn bare_ip_gets_the_dns_port() {
        let addr = parse_nameserver("8.8.8.8").unwrap();
        assert_eq!(addr, "8.8.8.8:53".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn explicit_port_is_kept() {
        let addr = parse_nameserver(" 127.0.0.1:5353 ").unwrap();
        assert_eq!(addr.port(), 5353);

        let v6 = parse_nameserver("[2001:db8::1]:53").unwrap();
        assert!(v6.is_ipv6());
    }

    #[test]
    fn hostname_is_not_a_nameserver() {
        assert!(matches!(
            parse_nameserver("dns.google"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn non_nxdomain_failures_are_errors() {
        let err = ResolveError::from(ResolveErrorKind::Message("request timed out"));
        assert!(matches!(
            classify("www.example.com", err),
            Err(Error::Resolver(_))
        ));
    }

    #[test]
    fn options_disable_caching() {
        let opts = options(QUERY_TIMEOUT);
        assert_eq!(opts.cache_size, 0);
        assert!(!opts.use_hosts_file);
    }

    #[tokio::test]
    async fn servfail_is_an_error_not_nxdomain() {
        let addr = spawn_nameserver(2).await;
        let resolver =
            HickoryResolver::with_timeout(&addr.to_string(), Duration::from_secs(2)).unwrap();

        let outcome = resolver.resolve("www.example.com", IpFamily::V4).await;

        assert!(matches!(outcome, Err(Error::Resolver(_))), "{:?}", outcome);
    }

    #[tokio::test]
    async fn refused_is_an_error_not_nxdomain() {
        let addr = spawn_nameserver(5).await;
        let resolver =
            HickoryResolver::with_timeout(&addr.to_string(), Duration::from_secs(2)).unwrap();

        let outcome = resolver.resolve("www.example.com", IpFamily::V6).await;

        assert!(matches!(outcome, Err(Error::Resolver(_))), "{:?}", outcome);
    }

    #[tokio::test]
    async fn nxdomain_answer_means_the_name_is_absent() {
        let addr = spawn_nameserver(3).await;
        let resolver =
            HickoryResolver::with_timeout(&addr.to_string(), Duration::from_secs(2)).unwrap();

        let outcome = resolver.resolve("gone.example.com", IpFamily::V4).await;

        assert!(matches!(outcome, Ok(Resolution::NxDomain)), "{:?}", outcome);
    }

    #[tokio::test]
    async fn unreachable_nameserver_is_an_error_not_nxdomain() {
        let resolver =
            HickoryResolver::with_timeout("127.0.0.1:9", Duration::from_millis(200)).unwrap();

        let outcome = resolver.resolve("www.example.com", IpFamily::V4).await;

        assert!(matches!(outcome, Err(Error::Resolver(_))));
    }
}
