use crate::configuration::FamilyPreference;
use crate::ping::PingError;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unspecified,
}

impl AddressFamily {
    /// Family of an optional resolution, `Unspecified` when nothing was resolved.
    pub fn of(address: Option<&ResolvedAddress>) -> Self {
        address.map_or(Self::Unspecified, ResolvedAddress::family)
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
            Self::Unspecified => "unspecified",
        })
    }
}

/// The outcome of one resolution. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    ip: IpAddr,
}

impl ResolvedAddress {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip }
    }

    /// Rebuilds an address from its 4 or 16 raw network order bytes.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        let ip = match raw.len() {
            4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(raw).ok()?)),
            16 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(raw).ok()?)),
            _ => return None,
        };
        Some(Self { ip })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn raw(&self) -> Box<[u8]> {
        match self.ip {
            IpAddr::V4(ip) => ip.octets().into(),
            IpAddr::V6(ip) => ip.octets().into(),
        }
    }

    /// Socket address suitable for raw ICMP sockets, which ignore the port.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, 0)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.ip, f)
    }
}

impl From<IpAddr> for ResolvedAddress {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip)
    }
}

/// Parses textual IPv4 and IPv6 literals, including bracketed IPv6.
pub fn parse_literal(host: &str) -> Option<ResolvedAddress> {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse::<IpAddr>().ok().map(ResolvedAddress::new)
}

fn family_matches(ip: &IpAddr, family: FamilyPreference) -> bool {
    match family {
        FamilyPreference::Any => true,
        FamilyPreference::Ipv4 => ip.is_ipv4(),
        FamilyPreference::Ipv6 => ip.is_ipv6(),
    }
}

fn lookup_strategy(family: FamilyPreference) -> LookupIpStrategy {
    match family {
        FamilyPreference::Any => LookupIpStrategy::Ipv4thenIpv6,
        FamilyPreference::Ipv4 => LookupIpStrategy::Ipv4Only,
        FamilyPreference::Ipv6 => LookupIpStrategy::Ipv6Only,
    }
}

fn build_resolver(timeout: Duration, strategy: LookupIpStrategy) -> TokioResolver {
    let mut builder = match Resolver::builder_tokio() {
        Ok(builder) => builder,
        Err(e) => {
            warn!("Unreadable system resolver configuration, using defaults: {}", e);
            Resolver::builder_with_config(
                ResolverConfig::google(),
                TokioConnectionProvider::default(),
            )
        }
    };
    let options = builder.options_mut();
    options.timeout = timeout;
    options.ip_strategy = strategy;
    builder.build()
}

/// Name resolution front end.
///
/// Holds one resolver per lookup strategy, so an IPv6 only lookup queries AAAA records
/// instead of filtering an A first answer. Cloning is cheap: clones share the underlying
/// resolvers and their caches, while each `resolve` call owns its own lookup future so
/// concurrent resolutions never observe each other's state.
#[derive(Clone)]
pub struct HostResolver {
    any: TokioResolver,
    ipv4: TokioResolver,
    ipv6: TokioResolver,
    timeout: Duration,
}

impl fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HostResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            any: build_resolver(timeout, lookup_strategy(FamilyPreference::Any)),
            ipv4: build_resolver(timeout, lookup_strategy(FamilyPreference::Ipv4)),
            ipv6: build_resolver(timeout, lookup_strategy(FamilyPreference::Ipv6)),
            timeout,
        }
    }

    fn resolver_for(&self, family: FamilyPreference) -> &TokioResolver {
        match family {
            FamilyPreference::Any => &self.any,
            FamilyPreference::Ipv4 => &self.ipv4,
            FamilyPreference::Ipv6 => &self.ipv6,
        }
    }

    /// Process wide resolver. Must first be called from within a tokio runtime.
    pub fn shared() -> Self {
        static SHARED: OnceLock<HostResolver> = OnceLock::new();
        SHARED
            .get_or_init(|| Self::new(DEFAULT_RESOLUTION_TIMEOUT))
            .clone()
    }

    pub async fn resolve(&self, host: &str) -> Result<ResolvedAddress, PingError> {
        self.resolve_family(host, FamilyPreference::Any).await
    }

    pub async fn resolve_family(
        &self,
        host: &str,
        family: FamilyPreference,
    ) -> Result<ResolvedAddress, PingError> {
        let failure = |reason: String| PingError::Resolution {
            host: host.to_string(),
            reason,
        };

        if host.trim().is_empty() {
            return Err(failure("empty host name".to_string()));
        }
        if let Some(address) = parse_literal(host) {
            return if family_matches(&address.ip(), family) {
                Ok(address)
            } else {
                Err(failure(format!("{} is not an {:?} address", address, family)))
            };
        }

        let resolver = self.resolver_for(family);
        let lookup = tokio::time::timeout(self.timeout, resolver.lookup_ip(host.trim()))
            .await
            .map_err(|_| failure(format!("no answer after {:?}", self.timeout)))?
            .map_err(|e| failure(e.to_string()))?;

        let address = lookup
            .iter()
            .find(|ip| family_matches(ip, family))
            .map(ResolvedAddress::new)
            .ok_or_else(|| failure(format!("no {:?} address", family)))?;
        debug!("Resolved {} to {}", host, address);
        Ok(address)
    }

    /// Canonical textual form of a raw resolved address.
    pub fn host_ip(raw: &[u8]) -> Option<String> {
        ResolvedAddress::from_raw(raw).map(|address| address.to_string())
    }
}
