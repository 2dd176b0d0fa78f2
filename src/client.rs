//! HTTP client with upstream selection, DNS spreading and failover.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::{
    balancer::{HttpBalancer, Sender},
    dial::ShuffleResolve,
    metadata::{Body, RequestMetadata},
    random::RandomSource,
    resolver::{Lookup, ResolverCache, SystemLookup},
    retry::FailoverPolicy,
    selector::{Selection, UpstreamSelector},
    Error, Response, Result,
};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// An HTTP client that spreads requests over a set of upstreams.
///
/// The client is cheap to clone and designed to be shared across tasks. With a
/// single base URL it behaves like a plain client whose connections are spread
/// over the host's DNS addresses. With several base URLs, relative requests
/// are distributed round-robin (or randomly). With
/// [`http_balance`](ClientBuilder::http_balance) enabled, each request also
/// fails over to other hosts and addresses when a connection cannot be
/// established.
///
/// # Examples
///
/// ```no_run
/// use upstream::Client;
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct CreateUser {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let client = Client::builder()
///     .base_urls(["http://users-1.internal:8080", "http://users-2.internal:8080"])?
///     .http_balance(Duration::from_secs(30))
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let user: User = client.get("/users/123").await?.error_for_status()?.json()?;
/// println!("User: {}", user.name);
///
/// let created: User = client
///     .post("/users", &CreateUser { name: "Alice".to_string() })
///     .await?
///     .json()?;
/// println!("Created user with ID: {}", created.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    sender: Arc<dyn Sender>,
    selector: UpstreamSelector,
    default_headers: HeaderMap,
    basic_auth: Option<(String, String)>,
    timeout: Option<Duration>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Sends a request described by `metadata`.
    ///
    /// Any status code is a successful response; transport failures and
    /// failover exhaustion are errors.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use upstream::{Client, metadata::RequestMetadata};
    /// use http::Method;
    ///
    /// # async fn example() -> Result<(), upstream::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::POST, "/login")
    ///     .with_form([("user", "alice"), ("password", "hunter2")]);
    ///
    /// let response = client.call(metadata).await?;
    /// println!("{}", response.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call(&self, metadata: RequestMetadata) -> Result<Response> {
        let started = Instant::now();
        let method = metadata.method.clone();
        let uri = metadata.uri.clone();

        let request = self.build_request(metadata)?;
        tracing::debug!(method = %method, url = %request.url(), "Executing HTTP request");

        let result = match self.inner.sender.send(request).await {
            Ok(response) => Response::read(response, started).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                tracing::info!(
                    status = response.status.as_u16(),
                    latency_ms = response.latency.as_millis(),
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    method = %method,
                    uri = %uri,
                    "Request failed"
                );
                Err(e)
            }
        }
    }

    /// Builds the outgoing request: URL, query, headers, auth and body.
    fn build_request(&self, metadata: RequestMetadata) -> Result<reqwest::Request> {
        let mut url = self.resolve_url(&metadata.uri)?;
        set_query_params(&mut url, &metadata.query_params);

        let mut headers = self.inner.default_headers.clone();
        for (name, value) in &metadata.headers {
            headers.append(name, value.clone());
        }

        let body: Option<reqwest::Body> = match metadata.body {
            Body::Empty => None,
            Body::Text(text) => Some(text.into()),
            Body::Bytes(bytes) => Some(bytes.into()),
            Body::Json(value) => {
                let json = serde_json::to_vec(&value)
                    .map_err(|e| Error::SerializationFailed(e.to_string()))?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
                }
                Some(json.into())
            }
            Body::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                }
                Some(encoded.into())
            }
        };

        let mut request = self
            .inner
            .http_client
            .request(metadata.method, url)
            .headers(headers);

        if let Some((username, password)) = &self.inner.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        request.build().map_err(Error::from_transport)
    }

    /// Absolute URIs are used as given; relative ones get a base URL.
    fn resolve_url(&self, uri: &str) -> Result<Url> {
        match Url::parse(uri) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.inner.selector.select().ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "Relative URI {:?} requires a base URL",
                        uri
                    ))
                })?;
                Ok(Url::parse(&format!("{}{}", base, uri))?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Makes a GET request.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use upstream::Client;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User { name: String }
    ///
    /// # async fn example() -> Result<(), upstream::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let user: User = client.get("/users/123").await?.json()?;
    /// println!("User: {}", user.name);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(&self, uri: impl Into<String>) -> Result<Response> {
        self.call(RequestMetadata::new(Method::GET, uri)).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req>(&self, uri: impl Into<String>, body: &Req) -> Result<Response>
    where
        Req: Serialize + ?Sized,
    {
        self.call(RequestMetadata::new(Method::POST, uri).with_json(body)?)
            .await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req>(&self, uri: impl Into<String>, body: &Req) -> Result<Response>
    where
        Req: Serialize + ?Sized,
    {
        self.call(RequestMetadata::new(Method::PUT, uri).with_json(body)?)
            .await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req>(&self, uri: impl Into<String>, body: &Req) -> Result<Response>
    where
        Req: Serialize + ?Sized,
    {
        self.call(RequestMetadata::new(Method::PATCH, uri).with_json(body)?)
            .await
    }

    /// Makes a DELETE request.
    pub async fn delete(&self, uri: impl Into<String>) -> Result<Response> {
        self.call(RequestMetadata::new(Method::DELETE, uri)).await
    }

    /// The configured base URLs.
    pub fn base_urls(&self) -> &[String] {
        self.inner.selector.base_urls()
    }
}

/// Replaces or adds each `(key, value)` in the query string of `url`.
fn set_query_params(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        return;
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(k, _)| !params.iter().any(|(key, _)| key == k))
        .collect();
    pairs.extend(params.iter().cloned());
    url.query_pairs_mut().clear().extend_pairs(pairs);
}

/// Builder for configuring and creating a [`Client`].
///
/// Every setting is validated here; a misconfigured client is never built.
///
/// # Examples
///
/// ```no_run
/// use upstream::{ClientBuilder, Selection};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let client = ClientBuilder::new()
///     .base_urls(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])?
///     .selection(Selection::Random)
///     .timeout(Duration::from_secs(30))
///     .dial_timeout(Duration::from_millis(500))
///     .max_idle_conns(64)
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_urls: Vec<Url>,
    selection: Selection,
    balance_ttl: Option<Duration>,
    default_headers: HeaderMap,
    basic_auth: Option<(String, String)>,
    timeout: Option<Duration>,
    dial_timeout: Duration,
    max_idle_conns: usize,
    cookie_store: bool,
    proxy: Option<String>,
    failover_policy: Option<Arc<dyn FailoverPolicy>>,
    lookup: Arc<dyn Lookup>,
    random_source: Option<Arc<RandomSource>>,
    sender: Option<Arc<dyn Sender>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings: a one minute
    /// request timeout, a one second dial timeout, up to 128 idle
    /// connections per host and a cookie store.
    pub fn new() -> Self {
        Self {
            base_urls: Vec::new(),
            selection: Selection::RoundRobin,
            balance_ttl: None,
            default_headers: HeaderMap::new(),
            basic_auth: None,
            timeout: Some(Duration::from_secs(60)),
            dial_timeout: Duration::from_secs(1),
            max_idle_conns: 128,
            cookie_store: true,
            proxy: None,
            failover_policy: None,
            lookup: Arc::new(SystemLookup),
            random_source: None,
            sender: None,
        }
    }

    /// Sets a single base URL for relative request URIs.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or has no host.
    pub fn base_url(self, url: impl AsRef<str>) -> Result<Self> {
        self.base_urls([url])
    }

    /// Sets the base URLs that relative request URIs are spread over.
    ///
    /// # Errors
    ///
    /// Returns an error if any URL is invalid or has no host.
    pub fn base_urls<I>(mut self, urls: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.base_urls = urls
            .into_iter()
            .map(|url| {
                let url = Url::parse(url.as_ref())?;
                if url.host_str().is_none() {
                    return Err(Error::ConfigurationError(format!(
                        "Base URL {} has no host",
                        url
                    )));
                }
                Ok(url)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Chooses how relative requests pick a base URL when several are set.
    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Enables request-level balancing over the hosts of the base URLs.
    ///
    /// Each request then tries the hosts in random order and each host's
    /// addresses in random order, moving on only when a connection cannot be
    /// established. Resolved addresses are cached for `cache_ttl`; zero
    /// resolves on every request.
    ///
    /// Requests are sent to bare IP addresses, so certificate verification is
    /// disabled for `https` base URLs.
    pub fn http_balance(mut self, cache_ttl: Duration) -> Self {
        self.balance_ttl = Some(cache_ttl);
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sends HTTP basic credentials with every request.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// Sets the timeout for each request attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the timeout for establishing a connection.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the maximum number of idle connections kept per host.
    pub fn max_idle_conns(mut self, max: usize) -> Self {
        self.max_idle_conns = max;
        self
    }

    /// Enables or disables the in-memory cookie store. Cookies set by a
    /// response are sent back on later requests to the same host.
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    /// Routes all traffic through `proxy_url`. An empty string restores the
    /// default of using the proxies named in the environment.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        let proxy_url = proxy_url.into();
        self.proxy = (!proxy_url.is_empty()).then_some(proxy_url);
        self
    }

    /// Replaces the default [`DialPhaseOnly`](crate::retry::DialPhaseOnly)
    /// failover policy used by [`http_balance`](Self::http_balance).
    pub fn failover_policy(mut self, policy: Arc<dyn FailoverPolicy>) -> Self {
        self.failover_policy = Some(policy);
        self
    }

    /// Replaces the system resolver used for upstream hosts.
    pub fn lookup(mut self, lookup: Arc<dyn Lookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Uses `rng` for shuffling and random selection.
    pub fn random_source(mut self, rng: Arc<RandomSource>) -> Self {
        self.random_source = Some(rng);
        self
    }

    /// Replaces the transport that actually sends requests. The balancer, if
    /// enabled, wraps it.
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if balancing is enabled without base URLs, if the
    /// proxy URL is invalid, or if the HTTP client cannot be created.
    pub fn build(self) -> Result<Client> {
        if self.balance_ttl.is_some() && self.base_urls.is_empty() {
            return Err(Error::ConfigurationError(
                "HTTP balancing requires base URLs".to_string(),
            ));
        }

        let rng = self
            .random_source
            .unwrap_or_else(|| Arc::new(RandomSource::new()));
        let cache = Arc::new(ResolverCache::new(self.lookup));

        let mut http = reqwest::Client::builder()
            .connect_timeout(self.dial_timeout)
            .pool_max_idle_per_host(self.max_idle_conns)
            .cookie_store(self.cookie_store);

        if !self.base_urls.is_empty() {
            http = http.dns_resolver(Arc::new(ShuffleResolve::new(
                cache.clone(),
                rng.clone(),
                Duration::ZERO,
            )));
        }

        if let Some(proxy_url) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| Error::ConfigurationError(format!("Invalid proxy URL: {}", e)))?;
            http = http.proxy(proxy);
        }

        let balanced_tls = self.balance_ttl.is_some()
            && self.base_urls.iter().any(|url| url.scheme() == "https");
        if balanced_tls {
            tracing::warn!("HTTP balancing over https: certificate verification is disabled");
            http = http.danger_accept_invalid_certs(true);
        }

        let http_client = http.build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let mut sender: Arc<dyn Sender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(http_client.clone()),
        };

        if let Some(ttl) = self.balance_ttl {
            let hosts = self.base_urls.iter().map(authority).collect::<Vec<_>>();
            let mut balancer = HttpBalancer::new(sender, hosts, cache, rng.clone())?.cache_ttl(ttl);
            if let Some(policy) = self.failover_policy {
                balancer = balancer.failover_policy(policy);
            }
            sender = Arc::new(balancer);
        }

        let base_urls = self
            .base_urls
            .iter()
            .map(|url| url.as_str().trim_end_matches('/').to_string())
            .collect();

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                sender,
                selector: UpstreamSelector::new(base_urls, self.selection, rng),
                default_headers: self.default_headers,
                basic_auth: self.basic_auth,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `host[:port]` of a base URL; the port is omitted when it is the scheme
/// default.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
