//! Request description types: method, URI, headers, query and body.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;

/// The body of an outgoing request.
///
/// Every variant is held in memory, so a request can be replayed against
/// another upstream after a failed connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// A UTF-8 text body, sent as-is.
    Text(String),
    /// Raw bytes, sent as-is.
    Bytes(bytes::Bytes),
    /// A JSON document. Sets `content-type: application/json; charset=utf-8`
    /// unless the request already has a content type.
    Json(serde_json::Value),
    /// URL-encoded form fields. Sets
    /// `content-type: application/x-www-form-urlencoded; charset=utf-8` unless
    /// the request already has a content type.
    Form(Vec<(String, String)>),
}

/// Metadata for an individual HTTP request.
///
/// `uri` may be absolute (`https://host/path`), in which case it is used as
/// is, or relative (`/path`), in which case a configured base URL is
/// prepended.
///
/// # Examples
///
/// ```
/// use upstream::metadata::{Body, RequestMetadata};
/// use http::Method;
///
/// let metadata = RequestMetadata::new(Method::POST, "/search")
///     .with_header("x-request-id", "abc123")?
///     .with_query_param("limit", "10")
///     .with_json(&serde_json::json!({ "q": "rust" }))?;
///
/// assert!(matches!(metadata.body, Body::Json(_)));
/// # Ok::<(), upstream::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The request URI, absolute or relative to the base URL.
    pub uri: String,

    /// Additional headers for this request. Added after the client's default
    /// headers; repeated names keep every value.
    pub headers: HeaderMap,

    /// Query parameters. Each one replaces a parameter of the same name
    /// already present in `uri`.
    pub query_params: Vec<(String, String)>,

    /// The request body.
    pub body: Body,
}

impl RequestMetadata {
    /// Creates a new `RequestMetadata` with the given method and URI.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Sets a query parameter on the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.query_params.retain(|(k, _)| *k != key);
        self.query_params.push((key, value.into()));
        self
    }

    /// Sets multiple query parameters on the request.
    pub fn with_query_params(
        mut self,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        for (key, value) in params {
            self = self.with_query_param(key, value);
        }
        self
    }

    /// Uses `text` as the body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Body::Text(text.into());
        self
    }

    /// Uses `bytes` as the body.
    pub fn with_bytes(mut self, bytes: impl Into<bytes::Bytes>) -> Self {
        self.body = Body::Bytes(bytes.into());
        self
    }

    /// Serializes `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SerializationFailed`] if `value` cannot be
    /// represented as JSON.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, crate::Error> {
        let json = serde_json::to_value(value)
            .map_err(|e| crate::Error::SerializationFailed(e.to_string()))?;
        self.body = Body::Json(json);
        Ok(self)
    }

    /// Uses `fields` as a URL-encoded form body.
    pub fn with_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
