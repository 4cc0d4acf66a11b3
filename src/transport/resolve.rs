//! Destination resolution
//!
//! The redirect override is applied first, then the domain strategy decides
//! which resolved addresses are dialed and in what order.

use super::TransportError;
use crate::config::{split_host_port, DestinationOverride, DomainStrategy, IpFamily, OutboundPlan};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::debug;

/// Host and port a connection is meant for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or `[v6]:port`
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let (host, port) = split_host_port("destination", raw)
            .map_err(|e| TransportError::Resolve(e.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::Resolve(format!(
                "missing host in destination {:?}",
                raw
            )));
        }
        Ok(Self { host, port })
    }

    /// The host as an IP literal, if it is one
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Maps a requested destination to the socket addresses to dial
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    strategy: DomainStrategy,
    redirect: Option<DestinationOverride>,
}

impl Resolver {
    pub fn new(strategy: DomainStrategy, redirect: Option<DestinationOverride>) -> Self {
        Self { strategy, redirect }
    }

    pub fn from_plan(plan: &OutboundPlan) -> Self {
        Self::new(plan.domain_strategy, plan.destination_override.clone())
    }

    pub fn strategy(&self) -> DomainStrategy {
        self.strategy
    }

    /// Replace the port, and the host unless the override's host is empty
    pub fn apply_override(&self, destination: Destination) -> Destination {
        match &self.redirect {
            None => destination,
            Some(over) => Destination {
                host: if over.host.is_empty() {
                    destination.host
                } else {
                    over.host.clone()
                },
                port: over.port,
            },
        }
    }

    /// Addresses to try, in order
    pub async fn resolve(&self, requested: Destination) -> Result<Vec<SocketAddr>, TransportError> {
        let destination = self.apply_override(requested);

        // Literal addresses are dialed as given whatever the strategy
        if let Some(ip) = destination.ip() {
            return Ok(vec![SocketAddr::new(ip, destination.port)]);
        }

        let resolved: Vec<SocketAddr> = lookup_host((destination.host.as_str(), destination.port))
            .await
            .map_err(|e| TransportError::Resolve(format!("{}: {}", destination, e)))?
            .collect();

        let addrs = select(self.strategy, resolved)
            .map_err(|reason| TransportError::Resolve(format!("{}: {}", destination, reason)))?;
        debug!(
            destination = %destination,
            strategy = ?self.strategy,
            addrs = addrs.len(),
            "resolved destination"
        );
        Ok(addrs)
    }
}

/// Filter and order `resolved` for `strategy`. Forced strategies fail when no
/// address of an allowed family is left; the others fall back to the
/// resolver's answer.
fn select(strategy: DomainStrategy, resolved: Vec<SocketAddr>) -> Result<Vec<SocketAddr>, String> {
    if resolved.is_empty() {
        return Err("no addresses found".to_string());
    }
    let Some(families) = strategy.families() else {
        return Ok(resolved);
    };

    let ordered = order_by_family(&resolved, families);
    if !ordered.is_empty() {
        Ok(ordered)
    } else if strategy.is_forced() {
        Err(format!("no address matches {:?}", strategy))
    } else {
        Ok(resolved)
    }
}

/// Keep only addresses of `families`, grouped in the given family order.
/// Order within a family is preserved.
pub fn order_by_family(addrs: &[SocketAddr], families: &[IpFamily]) -> Vec<SocketAddr> {
    families
        .iter()
        .flat_map(|family| {
            addrs.iter().copied().filter(move |addr| match family {
                IpFamily::V4 => addr.is_ipv4(),
                IpFamily::V6 => addr.is_ipv6(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> Vec<SocketAddr> {
        vec![
            "[2001:db8::1]:443".parse().unwrap(),
            "192.0.2.1:443".parse().unwrap(),
            "[2001:db8::2]:443".parse().unwrap(),
            "192.0.2.2:443".parse().unwrap(),
        ]
    }

    #[test]
    fn test_destination_parse() {
        let dest = Destination::parse("example.com:443").unwrap();
        assert_eq!(dest, Destination::new("example.com", 443));
        assert_eq!(dest.to_string(), "example.com:443");

        let dest = Destination::parse("[::1]:8443").unwrap();
        assert_eq!(dest.ip(), Some("::1".parse().unwrap()));
        assert_eq!(dest.to_string(), "[::1]:8443");

        assert!(Destination::parse(":443").is_err());
        assert!(Destination::parse("example.com").is_err());
    }

    #[test]
    fn test_override() {
        let dest = Destination::new("example.com", 80);

        let resolver = Resolver::default();
        assert_eq!(resolver.apply_override(dest.clone()), dest);

        let resolver = Resolver::new(
            DomainStrategy::AsIs,
            Some(DestinationOverride {
                host: String::new(),
                port: 8080,
            }),
        );
        assert_eq!(
            resolver.apply_override(dest.clone()),
            Destination::new("example.com", 8080)
        );

        let resolver = Resolver::new(
            DomainStrategy::AsIs,
            Some(DestinationOverride {
                host: "10.0.0.1".to_string(),
                port: 53,
            }),
        );
        assert_eq!(resolver.apply_override(dest), Destination::new("10.0.0.1", 53));
    }

    #[test]
    fn test_order_by_family() {
        let all = addrs();
        let v4: Vec<SocketAddr> = order_by_family(&all, &[IpFamily::V4]);
        assert_eq!(v4, vec![all[1], all[3]]);

        let v64 = order_by_family(&all, &[IpFamily::V6, IpFamily::V4]);
        assert_eq!(v64, vec![all[0], all[2], all[1], all[3]]);

        let v46 = order_by_family(&all, &[IpFamily::V4, IpFamily::V6]);
        assert_eq!(v46, vec![all[1], all[3], all[0], all[2]]);
    }

    #[test]
    fn test_select_fallback_and_force() {
        let v4_only: Vec<SocketAddr> = vec!["192.0.2.1:443".parse().unwrap()];

        // UseIp6 falls back to what the resolver returned
        assert_eq!(select(DomainStrategy::UseIp6, v4_only.clone()).unwrap(), v4_only);
        // ForceIp6 does not
        assert!(select(DomainStrategy::ForceIp6, v4_only.clone()).is_err());

        assert_eq!(select(DomainStrategy::UseIp, v4_only.clone()).unwrap(), v4_only);
        assert!(select(DomainStrategy::AsIs, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_literal_skips_strategy() {
        let resolver = Resolver::new(DomainStrategy::ForceIp6, None);
        let addrs = resolver
            .resolve(Destination::new("127.0.0.1", 9))
            .await
            .unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:9".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_redirect_applies_before_resolution() {
        let resolver = Resolver::new(
            DomainStrategy::UseIp4,
            Some(DestinationOverride {
                host: "127.0.0.1".to_string(),
                port: 7,
            }),
        );
        let addrs = resolver
            .resolve(Destination::new("unreachable.invalid", 443))
            .await
            .unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:7".parse::<SocketAddr>().unwrap()]);
    }
}
