//! Name resolution into ordered connection candidates.
//!
//! Every call resolves afresh; relay addresses may rotate between
//! invocations, so nothing is cached.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::config::AddressFamily;
use crate::error::{Error, Result};

/// IP family of a resolved candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

/// One concrete address to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCandidate {
    /// Family of `addr`.
    pub family: Family,
    /// Socket address to connect to.
    pub addr: SocketAddr,
}

impl AddressCandidate {
    /// Wraps a socket address, deriving its family.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        let family = if addr.is_ipv4() { Family::V4 } else { Family::V6 };
        Self { family, addr }
    }
}

impl std::fmt::Display for AddressCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr.ip())
    }
}

/// Name-resolution capability.
pub trait Resolve {
    /// Returns every socket address the platform knows for `host:port`,
    /// in the platform's preference order.
    fn lookup(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Keeps the addresses admitted by `family`, dropping repeated
/// (family, IP) pairs while preserving first-seen order.
pub fn filter_candidates(
    addrs: impl IntoIterator<Item = SocketAddr>,
    family: AddressFamily,
) -> Vec<AddressCandidate> {
    let mut seen = HashSet::new();
    addrs
        .into_iter()
        .filter(|addr| family.admits(addr))
        .map(AddressCandidate::new)
        .filter(|candidate| seen.insert((candidate.family, candidate.addr.ip())))
        .collect()
}

/// Resolves `host:port` into the ordered candidate list for `family`.
///
/// # Errors
///
/// Returns [`Error::Resolution`] if the lookup fails, times out, or yields
/// no address of the requested family.
pub async fn resolve_candidates<R: Resolve>(
    resolver: &R,
    host: &str,
    port: u16,
    family: AddressFamily,
    timeout: Duration,
) -> Result<Vec<AddressCandidate>> {
    let addrs = match tokio::time::timeout(timeout, resolver.lookup(host, port)).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => {
            return Err(Error::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(Error::Resolution {
                host: host.to_string(),
                reason: format!("lookup timed out after {}s", timeout.as_secs_f64()),
            });
        }
    };

    let candidates = filter_candidates(addrs, family);
    debug!(
        host,
        port,
        %family,
        count = candidates.len(),
        "resolved relay candidates"
    );

    if candidates.is_empty() {
        let reason = match family {
            AddressFamily::Auto => "no addresses found".to_string(),
            other => format!("no {other} addresses found"),
        };
        return Err(Error::Resolution {
            host: host.to_string(),
            reason,
        });
    }
    Ok(candidates)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    struct StaticResolver(Vec<SocketAddr>);

    impl Resolve for StaticResolver {
        async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            Ok(self.0.clone())
        }
    }

    struct FailingResolver;

    impl Resolve for FailingResolver {
        async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            Err(io::Error::other("Name or service not known"))
        }
    }

    struct HangingResolver;

    impl Resolve for HangingResolver {
        async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            std::future::pending().await
        }
    }

    fn v4(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last)), 587)
    }

    fn v6(last: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)), 587)
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let addrs = vec![v6(1), v4(1), v6(1), v4(2), v4(1)];
        let candidates = filter_candidates(addrs, AddressFamily::Auto);
        let got: Vec<SocketAddr> = candidates.iter().map(|c| c.addr).collect();
        assert_eq!(got, vec![v6(1), v4(1), v4(2)]);
        assert_eq!(candidates[0].family, Family::V6);
        assert_eq!(candidates[1].family, Family::V4);
    }

    #[test]
    fn candidate_displays_ip_literal() {
        assert_eq!(AddressCandidate::new(v4(7)).to_string(), "192.0.2.7");
        assert_eq!(AddressCandidate::new(v6(7)).to_string(), "2001:db8::7");
    }

    #[tokio::test]
    async fn family_filter_applies() {
        let resolver = StaticResolver(vec![v6(1), v4(1)]);
        let candidates = resolve_candidates(
            &resolver,
            "smtp.example.com",
            587,
            AddressFamily::Ipv4,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(candidates, vec![AddressCandidate::new(v4(1))]);
    }

    #[tokio::test]
    async fn ipv6_only_against_ipv4_host_fails() {
        let resolver = StaticResolver(vec![v4(1), v4(2)]);
        let err = resolve_candidates(
            &resolver,
            "v4only.example.com",
            587,
            AddressFamily::Ipv6,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().contains("no ipv6 addresses"));
    }

    #[tokio::test]
    async fn lookup_failure_is_resolution_error() {
        let err = resolve_candidates(
            &FailingResolver,
            "nowhere.invalid",
            25,
            AddressFamily::Auto,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_timeout_is_resolution_error() {
        let err = resolve_candidates(
            &HangingResolver,
            "slow.example.com",
            25,
            AddressFamily::Auto,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn system_resolver_passes_literals_through() {
        let addrs = SystemResolver.lookup("127.0.0.1", 2525).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:2525".parse::<SocketAddr>().unwrap()]);
    }

    fn arb_addr() -> impl Strategy<Value = SocketAddr> {
        (any::<bool>(), 0u8..4).prop_map(|(is_v4, n)| {
            if is_v4 { v4(n) } else { v6(u16::from(n)) }
        })
    }

    proptest! {
        #[test]
        fn ipv4_preference_yields_only_ipv4(addrs in prop::collection::vec(arb_addr(), 0..24)) {
            let candidates = filter_candidates(addrs, AddressFamily::Ipv4);
            prop_assert!(candidates.iter().all(|c| c.family == Family::V4 && c.addr.is_ipv4()));
        }

        #[test]
        fn ipv6_preference_yields_only_ipv6(addrs in prop::collection::vec(arb_addr(), 0..24)) {
            let candidates = filter_candidates(addrs, AddressFamily::Ipv6);
            prop_assert!(candidates.iter().all(|c| c.family == Family::V6 && c.addr.is_ipv6()));
        }

        #[test]
        fn each_pair_appears_once_in_first_seen_order(addrs in prop::collection::vec(arb_addr(), 0..24)) {
            let candidates = filter_candidates(addrs.clone(), AddressFamily::Auto);

            let mut expected: Vec<SocketAddr> = Vec::new();
            for addr in addrs {
                if !expected.contains(&addr) {
                    expected.push(addr);
                }
            }
            let got: Vec<SocketAddr> = candidates.iter().map(|c| c.addr).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
