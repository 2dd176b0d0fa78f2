//! Error types for balanced HTTP calls.
//!
//! Failures are tagged where they happen: a connection that could not be
//! established is an [`Error::Connect`], a host that did not resolve is an
//! [`Error::Resolve`] or [`Error::NoSuchHost`], and anything that went wrong
//! after a connection existed is a transport or HTTP error. The balancers use
//! these tags to decide whether another upstream may be tried.

use http::{HeaderMap, StatusCode};

/// Boxed cause carried by connection errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for balanced HTTP calls.
///
/// # Examples
///
/// ```no_run
/// use upstream::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_urls(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])?
///     .build()?;
///
/// match client.get("/health").await {
///     Ok(response) => println!("served by {}", response.url),
///     Err(Error::Connect { address, .. }) => eprintln!("could not reach {}", address),
///     Err(Error::NoSuchHost { host }) => eprintln!("{} has no addresses", host),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A connection to `address` could not be established.
    ///
    /// This is the only failure the default failover policy retries on
    /// another address or host.
    #[error("Connection to {address} failed: {source}")]
    Connect {
        /// The address that was dialed (`ip:port`, or the request URL).
        address: String,
        /// The underlying cause.
        #[source]
        source: BoxError,
    },

    /// Name resolution for `host` failed.
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        /// The logical host that was looked up.
        host: String,
        /// The resolver error.
        #[source]
        source: std::io::Error,
    },

    /// Name resolution for `host` succeeded but returned no addresses.
    #[error("No such host: {host}")]
    NoSuchHost {
        /// The logical host that was looked up.
        host: String,
    },

    /// A transport error after the connection was established.
    ///
    /// Wraps the underlying `reqwest::Error`: failed request writes, broken
    /// response reads, protocol violations, TLS handshake failures.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The request timed out after the connection was established.
    #[error("Request timed out")]
    Timeout,

    /// Failed to deserialize the response body into the expected type.
    ///
    /// Preserves the raw body and the serde message for debugging.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The server returned a non-2xx status and the caller asked for it to be
    /// treated as an error (see [`crate::Response::error_for_status`]).
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Invalid configuration was provided.
    ///
    /// Raised while building the client, never deferred to the first request.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The request body is a stream and cannot be sent more than once.
    #[error("Request body cannot be replayed across upstreams")]
    BodyNotReplayable,

    /// Writing a response body to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Wraps any error as a dial-phase failure for `address`.
    pub fn connect(address: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Connect {
            address: address.into(),
            source: source.into(),
        }
    }

    /// Classifies an error returned by `reqwest` when sending a request.
    ///
    /// Connection-establishment failures become [`Error::Connect`]. A TLS
    /// handshake also runs inside reqwest's connector, but it happens after the
    /// socket is open, so it stays a [`Error::Network`] error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() && !is_tls_failure(&err) {
            let address = err
                .url()
                .map(|url| url.to_string())
                .unwrap_or_default();
            return Error::Connect {
                address,
                source: Box::new(err),
            };
        }
        if err.is_timeout() {
            return Error::Timeout;
        }
        Error::Network(err)
    }

    /// Returns `true` if the failure happened while establishing a connection.
    pub fn is_dial_phase(&self) -> bool {
        matches!(self, Error::Connect { .. })
    }

    /// Returns `true` if the failure is a resolution failure for one host.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::Resolve { .. } | Error::NoSuchHost { .. })
    }

    /// Returns `true` if a balancer may move on to another candidate.
    ///
    /// Dial-phase failures move to the next address; resolution failures move
    /// to the next host. Everything else is surfaced to the caller unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use upstream::Error;
    ///
    /// let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
    /// assert!(Error::connect("10.0.0.1:80", refused).is_retryable());
    /// assert!(Error::NoSuchHost { host: "svc.internal".into() }.is_retryable());
    /// assert!(!Error::Timeout.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.is_dial_phase() || self.is_resolution()
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::from_transport(err)
    }
}

// rustls reports handshake failures as `InvalidData` I/O errors.
fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cause = err.source();
    while let Some(inner) = cause {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::InvalidData {
                return true;
            }
        }
        cause = inner.source();
    }
    false
}

/// A specialized `Result` type for balanced HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;
