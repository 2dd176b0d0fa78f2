//! Response wrapper holding the body together with request metadata.
//!
//! The body is read in full before [`Response`] is handed out, so the helpers
//! below can be called any number of times and in any order.

use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// A completed HTTP response.
///
/// Non-2xx statuses are returned as responses too; use
/// [`error_for_status`](Self::error_for_status) to turn them into an
/// [`Error::HttpError`].
///
/// # Examples
///
/// ```no_run
/// use upstream::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), upstream::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get("/users/123").await?.error_for_status()?;
/// let user: User = response.json()?;
///
/// println!("User: {}", user.name);
/// println!("Request took {:?}", response.latency);
/// println!("Served by {}", response.url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body.
    pub body: Bytes,

    /// The URL the response came from. When HTTP balancing is enabled this
    /// names the concrete address that served the request.
    pub url: Url,

    /// Time from dispatch until the full body was read, including any
    /// failover attempts.
    pub latency: Duration,
}

impl Response {
    /// Creates a new `Response`.
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        url: Url,
        latency: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            latency,
        }
    }

    /// Reads `response` to the end.
    pub(crate) async fn read(
        response: reqwest::Response,
        started: std::time::Instant,
    ) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(Error::from_transport)?;
        Ok(Self::new(status, headers, body, url, started.elapsed()))
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body as text. Invalid UTF-8 is replaced with `U+FFFD`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use upstream::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     "hello".into(),
    ///     "http://10.0.0.1/".parse().unwrap(),
    ///     Duration::from_millis(3),
    /// );
    /// assert_eq!(response.text(), "hello");
    /// ```
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The raw body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body and the serde
    /// message if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let raw_response = self.text();
            tracing::error!(
                error = %e,
                raw_response = %raw_response,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response,
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }

    /// Writes the body to `path`, replacing any existing file.
    pub async fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, &self.body).await?;
        Ok(())
    }

    /// Returns `self` for 2xx statuses and [`Error::HttpError`] otherwise.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        let raw_response = self.text();
        if self.status.is_client_error() {
            tracing::error!(
                status = self.status.as_u16(),
                response = %raw_response,
                "Client error (4xx)"
            );
        } else if self.status.is_server_error() {
            tracing::warn!(
                status = self.status.as_u16(),
                response = %raw_response,
                "Server error (5xx)"
            );
        }

        Err(Error::HttpError {
            status: self.status,
            raw_response,
            headers: self.headers,
        })
    }

    /// Returns a header value by name, if present and valid UTF-8.
    ///
    /// # Examples
    ///
    /// ```
    /// # use upstream::Response;
    /// # use http::{HeaderMap, HeaderValue, StatusCode};
    /// # use std::time::Duration;
    /// let mut headers = HeaderMap::new();
    /// headers.insert("content-type", HeaderValue::from_static("application/json"));
    ///
    /// let response = Response::new(
    ///     StatusCode::OK,
    ///     headers,
    ///     "{}".into(),
    ///     "http://10.0.0.1/".parse().unwrap(),
    ///     Duration::from_millis(100),
    /// );
    ///
    /// assert_eq!(response.header("content-type"), Some("application/json"));
    /// ```
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    fn response(status: StatusCode, body: &'static str) -> Response {
        Response::new(
            status,
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
            Url::parse("http://10.0.0.1:8080/items").unwrap(),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_json() {
        let item: Item = response(StatusCode::OK, r#"{"id": 4}"#).json().unwrap();
        assert_eq!(item, Item { id: 4 });
    }

    #[test]
    fn test_json_failure_keeps_raw_body() {
        let err = response(StatusCode::OK, "not json").json::<Item>().unwrap_err();
        match err {
            Error::DeserializationFailed {
                raw_response,
                status,
                ..
            } => {
                assert_eq!(raw_response, "not json");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected DeserializationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(StatusCode::CREATED, "").error_for_status().is_ok());

        let err = response(StatusCode::SERVICE_UNAVAILABLE, "down")
            .error_for_status()
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.raw_response(), Some("down"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_to_file() {
        let path = std::env::temp_dir().join(format!("upstream-body-{}.txt", std::process::id()));
        response(StatusCode::OK, "saved body").to_file(&path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "saved body");
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
