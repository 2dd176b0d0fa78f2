//! Name resolution and the TTL-bounded address cache.
//!
//! [`Lookup`] is the seam to the platform resolver; [`ResolverCache`] sits in
//! front of it and remembers successful answers per upstream host until they
//! expire. Entries are refreshed lazily by the first lookup after expiry.

use crate::{BoxFuture, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Resolves a domain name to its addresses.
pub trait Lookup: Send + Sync {
    /// Looks up all addresses for `domain`.
    fn lookup_host<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// [`Lookup`] backed by the operating system resolver (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl Lookup for SystemLookup {
    fn lookup_host<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((domain, 0)).await?;
            let mut ips: Vec<IpAddr> = Vec::new();
            for addr in addrs {
                if !ips.contains(&addr.ip()) {
                    ips.push(addr.ip());
                }
            }
            Ok(ips)
        })
    }
}

/// Splits `host[:port]` into its domain and optional port.
///
/// Bracketed IPv6 literals lose their brackets. A bare IPv6 literal, or any
/// other string that is not a valid `host:port` pair, is returned whole as the
/// domain.
///
/// ```
/// use upstream::resolver::split_host_port;
///
/// assert_eq!(split_host_port("api.internal:8080"), ("api.internal", Some("8080")));
/// assert_eq!(split_host_port("api.internal"), ("api.internal", None));
/// assert_eq!(split_host_port("[::1]:443"), ("::1", Some("443")));
/// assert_eq!(split_host_port("::1"), ("::1", None));
/// ```
pub fn split_host_port(host: &str) -> (&str, Option<&str>) {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((domain, tail)) = rest.split_once(']') {
            return match tail.strip_prefix(':') {
                Some(port) if !port.is_empty() => (domain, Some(port)),
                _ => (domain, None),
            };
        }
        return (host, None);
    }
    match host.split_once(':') {
        Some((domain, port)) if !port.contains(':') && !port.is_empty() => (domain, Some(port)),
        _ => (host, None),
    }
}

struct CacheEntry {
    addrs: Vec<IpAddr>,
    expires_at: Instant,
}

/// Caches resolved addresses per upstream host with an expiry.
///
/// Reads take a shared lock and run concurrently; a refresh replaces the entry
/// under the exclusive lock. The lookup itself runs with no lock held, so two
/// callers missing at the same time may both resolve; the later write wins.
///
/// # Examples
///
/// ```no_run
/// use upstream::resolver::{ResolverCache, SystemLookup};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let cache = ResolverCache::new(Arc::new(SystemLookup));
/// let addrs = cache.resolve("example.com:443", Duration::from_secs(30)).await?;
/// assert!(!addrs.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct ResolverCache {
    lookup: Arc<dyn Lookup>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResolverCache {
    /// Creates an empty cache in front of `lookup`.
    pub fn new(lookup: Arc<dyn Lookup>) -> Self {
        Self {
            lookup,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the addresses for `host` (`domain[:port]`).
    ///
    /// An unexpired entry is served from the cache. Otherwise the domain is
    /// looked up; a non-empty answer is stored for `ttl` and returned. A `ttl`
    /// of zero disables caching entirely.
    ///
    /// # Errors
    ///
    /// * [`Error::Resolve`] if the lookup fails.
    /// * [`Error::NoSuchHost`] if the lookup returns no addresses.
    ///
    /// Neither outcome is cached.
    pub async fn resolve(&self, host: &str, ttl: Duration) -> Result<Vec<IpAddr>> {
        if !ttl.is_zero() {
            if let Some(addrs) = self.cached(host) {
                return Ok(addrs);
            }
        }

        let (domain, _) = split_host_port(host);
        let addrs = self
            .lookup
            .lookup_host(domain)
            .await
            .map_err(|source| Error::Resolve {
                host: host.to_string(),
                source,
            })?;

        if addrs.is_empty() {
            return Err(Error::NoSuchHost {
                host: host.to_string(),
            });
        }

        tracing::debug!(host, addresses = addrs.len(), "Resolved upstream host");

        if !ttl.is_zero() {
            let entry = CacheEntry {
                addrs: addrs.clone(),
                expires_at: Instant::now() + ttl,
            };
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(host.to_string(), entry);
        }

        Ok(addrs)
    }

    /// Drops the entry for `host`, forcing the next lookup to resolve.
    pub fn invalidate(&self, host: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(host);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(host)?;
        if Instant::now() < entry.expires_at {
            Some(entry.addrs.clone())
        } else {
            None
        }
    }
}

impl fmt::Debug for ResolverCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
