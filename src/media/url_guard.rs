//! Source URL validation.
//!
//! Keeps the extractor from being pointed at internal infrastructure:
//! only http(s), only allow-listed hosts, no loopback/private/link-local
//! targets. Literal IPs are checked synchronously; domain hosts can also be
//! resolved and re-checked with [`UrlGuard::validate_resolved`].

use super::error::UrlRejection;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Host, Url};

/// Host names that never leave the machine or the local network
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan"];

/// Name resolution used by [`UrlGuard::validate_resolved`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Addresses `host` resolves to.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Validates source URLs before they reach the extractor
#[derive(Clone)]
pub struct UrlGuard {
    allowed_hosts: Vec<String>,
    resolver: Option<Arc<dyn HostResolver>>,
}

impl UrlGuard {
    /// Create a guard for the given domain allow-list.
    ///
    /// An empty list accepts any public host. Entries match the domain itself
    /// and all of its subdomains.
    #[must_use]
    pub fn new(allowed_hosts: Vec<String>, resolve_hosts: bool) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().trim_start_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            resolver: resolve_hosts.then(|| Arc::new(SystemResolver) as Arc<dyn HostResolver>),
        }
    }

    /// Re-check domain hosts through `resolver` instead of the system one
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Parse and check a URL without any I/O.
    ///
    /// # Errors
    ///
    /// Returns the first [`UrlRejection`] that applies.
    pub fn validate(&self, raw: &str) -> Result<Url, UrlRejection> {
        let url = Url::parse(raw.trim()).map_err(|_| UrlRejection::Malformed)?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(UrlRejection::InvalidScheme);
        }

        match url.host() {
            None => return Err(UrlRejection::MissingHost),
            Some(Host::Ipv4(ip)) => {
                if is_blocked_ip(&IpAddr::V4(ip)) {
                    return Err(UrlRejection::PrivateNetworkBlocked);
                }
            }
            Some(Host::Ipv6(ip)) => {
                if is_blocked_ip(&IpAddr::V6(ip)) {
                    return Err(UrlRejection::PrivateNetworkBlocked);
                }
            }
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_lowercase();
                if is_local_name(&domain) {
                    return Err(UrlRejection::PrivateNetworkBlocked);
                }
                if !self.is_allowed(&domain) {
                    return Err(UrlRejection::HostNotAllowed);
                }
            }
        }

        Ok(url)
    }

    /// [`validate`](Self::validate), then resolve domain hosts and reject any
    /// that point into private address space.
    ///
    /// Resolution failures are logged and let through; the extractor will
    /// fail on its own. Redirects followed by the extractor are not checked.
    ///
    /// # Errors
    ///
    /// Returns the first [`UrlRejection`] that applies.
    pub async fn validate_resolved(&self, raw: &str) -> Result<Url, UrlRejection> {
        let url = self.validate(raw)?;

        let Some(resolver) = &self.resolver else {
            return Ok(url);
        };
        let Some(Host::Domain(domain)) = url.host() else {
            return Ok(url);
        };
        let port = url.port_or_known_default().unwrap_or(443);

        match resolver.resolve(domain, port).await {
            Ok(addrs) => {
                if let Some(ip) = addrs.iter().find(|ip| is_blocked_ip(ip)) {
                    warn!(host = %domain, ip = %ip, "Host resolves to a private address");
                    return Err(UrlRejection::PrivateNetworkBlocked);
                }
                debug!(host = %domain, count = addrs.len(), "Host resolved to public addresses");
            }
            Err(e) => {
                warn!(host = %domain, error = %e, "Failed to resolve host, passing to extractor");
            }
        }

        Ok(url)
    }

    fn is_allowed(&self, domain: &str) -> bool {
        self.allowed_hosts.is_empty()
            || self.allowed_hosts.iter().any(|allowed| {
                domain == allowed
                    || domain
                        .strip_suffix(allowed.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
    }
}

fn is_local_name(domain: &str) -> bool {
    domain == "localhost"
        || BLOCKED_HOST_SUFFIXES
            .iter()
            .any(|suffix| domain.ends_with(suffix))
}

/// Whether an address must never be fetched from
#[must_use]
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => embedded_ipv4(v6)
            .map_or_else(|| is_blocked_ipv6(v6), |v4| is_blocked_ipv4(&v4)),
    }
}

/// IPv4 address carried inside an IPv6 one: mapped, compatible, NAT64 or 6to4
fn embedded_ipv4(ip: &Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let join = |hi: u16, lo: u16| Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));
    match ip.segments() {
        // ::a.b.c.d (deprecated compatible form, also covers :: and ::1)
        [0, 0, 0, 0, 0, 0, hi, lo] => Some(join(hi, lo)),
        // 64:ff9b::/96 NAT64
        [0x64, 0xff9b, 0, 0, 0, 0, hi, lo] => Some(join(hi, lo)),
        // 2002::/16 6to4
        [0x2002, hi, lo, ..] => Some(join(hi, lo)),
        _ => None,
    }
}

fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
}
