//! Connection-level balancing: spreading one host's connections over its
//! resolved addresses.
//!
//! [`DnsBalancer`] wraps any [`Dial`] implementation and is itself a `Dial`, so
//! balancers can be stacked. [`ShuffleResolve`] applies the same resolve and
//! shuffle step inside `reqwest`'s own connector, which then tries the returned
//! addresses in order.

use crate::random::RandomSource;
use crate::resolver::{split_host_port, ResolverCache};
use crate::{BoxFuture, Error, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens a connection to `host:port`.
pub trait Dial: Send + Sync {
    /// The connection type produced on success.
    type Connection: Send;

    /// Connects to `address`.
    ///
    /// Failures to establish the connection must be reported as
    /// [`Error::Connect`].
    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Self::Connection>>;
}

impl<D: Dial + ?Sized> Dial for Arc<D> {
    type Connection = D::Connection;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Self::Connection>> {
        (**self).dial(address)
    }
}

/// Plain TCP dialer with an optional connect timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    timeout: Option<Duration>,
}

impl TcpDialer {
    /// Creates a dialer with no timeout of its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Dial for TcpDialer {
    type Connection = TcpStream;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<TcpStream>> {
        Box::pin(async move {
            let connect = TcpStream::connect(address);
            let stream = match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                    Ok(stream) => stream,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "dial timed out")),
                },
                None => connect.await,
            };
            stream.map_err(|e| Error::connect(address, e))
        })
    }
}

/// Resolves the host of each dialed address and tries its addresses in a
/// random order.
///
/// No failover across hosts happens at this layer: one dial serves exactly one
/// logical host.
///
/// # Examples
///
/// ```no_run
/// use upstream::dial::{Dial, DnsBalancer, TcpDialer};
/// use upstream::resolver::{ResolverCache, SystemLookup};
/// use upstream::RandomSource;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let cache = Arc::new(ResolverCache::new(Arc::new(SystemLookup)));
/// let balancer = DnsBalancer::new(
///     TcpDialer::new().timeout(Duration::from_secs(1)),
///     cache,
///     Arc::new(RandomSource::new()),
/// );
/// let stream = balancer.dial("example.com:80").await?;
/// # drop(stream);
/// # Ok(())
/// # }
/// ```
pub struct DnsBalancer<D> {
    dialer: D,
    cache: Arc<ResolverCache>,
    rng: Arc<RandomSource>,
    ttl: Duration,
}

impl<D: Dial> DnsBalancer<D> {
    /// Wraps `dialer`. Hosts are resolved on every dial until
    /// [`cache_ttl`](Self::cache_ttl) is set.
    pub fn new(dialer: D, cache: Arc<ResolverCache>, rng: Arc<RandomSource>) -> Self {
        Self {
            dialer,
            cache,
            rng,
            ttl: Duration::ZERO,
        }
    }

    /// Keeps resolved addresses for `ttl`.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn dial_balanced(&self, address: &str) -> Result<D::Connection> {
        let (host, port) = match split_host_port(address) {
            (host, Some(port)) => (host, port),
            (_, None) => {
                return Err(Error::connect(address, "missing port in address"));
            }
        };
        let port: u16 = port
            .parse()
            .map_err(|_| Error::connect(address, format!("invalid port {port:?}")))?;

        let mut ips = self.cache.resolve(host, self.ttl).await?;
        self.rng.shuffle(&mut ips);

        let mut last_error = None;
        for ip in ips {
            let target = SocketAddr::new(ip, port).to_string();
            match self.dialer.dial(&target).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!(address = %target, error = %e, "Dial failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::NoSuchHost {
            host: host.to_string(),
        }))
    }
}

impl<D: Dial> Dial for DnsBalancer<D> {
    type Connection = D::Connection;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Self::Connection>> {
        Box::pin(self.dial_balanced(address))
    }
}

/// DNS resolver hook for `reqwest` that returns each host's addresses
/// shuffled.
///
/// Installed by [`ClientBuilder`](crate::ClientBuilder) whenever base URLs are
/// configured, so every new connection lands on a random address of its host.
#[derive(Debug, Clone)]
pub struct ShuffleResolve {
    cache: Arc<ResolverCache>,
    rng: Arc<RandomSource>,
    ttl: Duration,
}

impl ShuffleResolve {
    /// Creates a resolver hook. A zero `ttl` resolves on every connection.
    pub fn new(cache: Arc<ResolverCache>, rng: Arc<RandomSource>, ttl: Duration) -> Self {
        Self { cache, rng, ttl }
    }

    /// Resolves and shuffles the addresses of `domain`.
    pub async fn shuffled(&self, domain: &str) -> Result<Vec<SocketAddr>> {
        let mut ips = self.cache.resolve(domain, self.ttl).await?;
        self.rng.shuffle(&mut ips);
        // The connector replaces port 0 with the port of the request URL.
        Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect())
    }
}

impl reqwest::dns::Resolve for ShuffleResolve {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let this = self.clone();
        Box::pin(async move {
            let resolved: std::result::Result<reqwest::dns::Addrs, crate::error::BoxError> =
                match this.shuffled(name.as_str()).await {
                    Ok(addrs) => Ok(Box::new(addrs.into_iter())),
                    Err(e) => Err(Box::new(e)),
                };
            resolved
        })
    }
}
