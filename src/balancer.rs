//! Request-level balancing and failover across upstream hosts.
//!
//! [`HttpBalancer`] wraps any [`Sender`]. For every request it visits the
//! upstream hosts in a fresh random order, resolves each one through the
//! shared [`ResolverCache`], and sends the request to the host's addresses
//! (also shuffled) until one accepts the connection. Only failures allowed by
//! the [`FailoverPolicy`] move on to the next candidate.

use crate::random::RandomSource;
use crate::resolver::{split_host_port, ResolverCache};
use crate::retry::{DialPhaseOnly, FailoverPolicy};
use crate::{BoxFuture, Error, Result};
use http::header::HOST;
use http::HeaderValue;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Executes an HTTP request.
///
/// Implemented by `reqwest::Client` (the real transport), by [`HttpBalancer`],
/// and by `Arc<S>`, so balancers can wrap each other.
pub trait Sender: Send + Sync {
    /// Sends `request` and returns the response head with its body.
    ///
    /// Implementations must report connection-establishment failures as
    /// [`Error::Connect`].
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<reqwest::Response>>;
}

impl Sender for reqwest::Client {
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<reqwest::Response>> {
        Box::pin(async move { self.execute(request).await.map_err(Error::from_transport) })
    }
}

impl<S: Sender + ?Sized> Sender for Arc<S> {
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<reqwest::Response>> {
        (**self).send(request)
    }
}

/// One configured upstream, parsed once at construction.
#[derive(Debug, Clone)]
struct UpstreamHost {
    authority: String,
    port: Option<u16>,
    host_header: HeaderValue,
}

impl UpstreamHost {
    fn parse(authority: &str) -> Result<Self> {
        let (domain, port) = split_host_port(authority);
        if domain.is_empty() {
            return Err(Error::ConfigurationError(format!(
                "Invalid upstream host {:?}",
                authority
            )));
        }
        let port = port
            .map(|p| {
                p.parse::<u16>().map_err(|_| {
                    Error::ConfigurationError(format!(
                        "Invalid port in upstream host {:?}",
                        authority
                    ))
                })
            })
            .transpose()?;
        let host_header = HeaderValue::from_str(authority).map_err(|e| {
            Error::ConfigurationError(format!("Invalid upstream host {:?}: {}", authority, e))
        })?;
        Ok(Self {
            authority: authority.to_string(),
            port,
            host_header,
        })
    }
}

/// Spreads requests over a set of upstream hosts and fails over between them.
///
/// The host set is fixed at construction and shared read-only by all
/// in-flight requests. Each call shuffles a private copy of it.
///
/// # Examples
///
/// ```no_run
/// use upstream::{HttpBalancer, RandomSource, Sender};
/// use upstream::resolver::{ResolverCache, SystemLookup};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let cache = Arc::new(ResolverCache::new(Arc::new(SystemLookup)));
/// let balancer = HttpBalancer::new(
///     reqwest::Client::new(),
///     ["api-1.internal:8080", "api-2.internal:8080"],
///     cache,
///     Arc::new(RandomSource::new()),
/// )?
/// .cache_ttl(Duration::from_secs(30));
///
/// let url = reqwest::Url::parse("http://api.internal/status")?;
/// let response = balancer
///     .send(reqwest::Request::new(reqwest::Method::GET, url))
///     .await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct HttpBalancer<S> {
    sender: S,
    hosts: Arc<[UpstreamHost]>,
    cache: Arc<ResolverCache>,
    rng: Arc<RandomSource>,
    ttl: Duration,
    policy: Arc<dyn FailoverPolicy>,
}

impl<S: Sender> HttpBalancer<S> {
    /// Wraps `sender` with failover across `hosts` (each `host[:port]`).
    ///
    /// Addresses are resolved on every request until
    /// [`cache_ttl`](Self::cache_ttl) is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `hosts` is empty or contains an
    /// unparseable entry.
    pub fn new<I>(
        sender: S,
        hosts: I,
        cache: Arc<ResolverCache>,
        rng: Arc<RandomSource>,
    ) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|host| UpstreamHost::parse(host.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(Error::ConfigurationError(
                "HTTP balancing requires at least one upstream host".to_string(),
            ));
        }

        Ok(Self {
            sender,
            hosts: hosts.into(),
            cache,
            rng,
            ttl: Duration::ZERO,
            policy: Arc::new(DialPhaseOnly),
        })
    }

    /// Keeps resolved addresses for `ttl`. Zero resolves on every request.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the default [`DialPhaseOnly`] failover policy.
    pub fn failover_policy(mut self, policy: Arc<dyn FailoverPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The configured upstream hosts, in configuration order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|host| host.authority.as_str())
    }

    async fn send_balanced(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        if request.try_clone().is_none() {
            return Err(Error::BodyNotReplayable);
        }

        let mut hosts = self.hosts.to_vec();
        self.rng.shuffle(&mut hosts);

        let mut last_error = None;

        for host in &hosts {
            let mut ips = match self.cache.resolve(&host.authority, self.ttl).await {
                Ok(ips) => ips,
                Err(e) => {
                    tracing::warn!(upstream = %host.authority, error = %e, "Skipping upstream");
                    last_error = Some(e);
                    continue;
                }
            };
            self.rng.shuffle(&mut ips);

            for ip in ips {
                let mut attempt = request.try_clone().ok_or(Error::BodyNotReplayable)?;
                retarget(&mut attempt, host, ip)?;

                tracing::debug!(
                    method = %attempt.method(),
                    upstream = %host.authority,
                    address = %ip,
                    "Sending request"
                );

                match self.sender.send(attempt).await {
                    Ok(response) => return Ok(response),
                    Err(e) if self.policy.should_failover(&e) => {
                        tracing::warn!(
                            upstream = %host.authority,
                            address = %ip,
                            error = %e,
                            "Upstream unreachable, failing over"
                        );
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::ConfigurationError("No upstream hosts configured".to_string())
        }))
    }
}

impl<S: Sender> Sender for HttpBalancer<S> {
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<reqwest::Response>> {
        Box::pin(self.send_balanced(request))
    }
}

impl<S> fmt::Debug for HttpBalancer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBalancer")
            .field("hosts", &self.hosts)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Points `request` at `ip` while keeping the logical host in `Host`.
fn retarget(request: &mut reqwest::Request, host: &UpstreamHost, ip: IpAddr) -> Result<()> {
    let url = request.url_mut();
    url.set_ip_host(ip)
        .and_then(|()| url.set_port(host.port))
        .map_err(|()| {
            Error::ConfigurationError(format!("Cannot route {} to an address", host.authority))
        })?;
    request.headers_mut().insert(HOST, host.host_header.clone());
    Ok(())
}
