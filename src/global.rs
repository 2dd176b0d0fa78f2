//! One-off requests through a process-wide default client.
//!
//! The default client has no base URLs, so every URI passed here must be
//! absolute. It is built on first use with [`ClientBuilder`] defaults and is
//! shared by every caller afterwards, cookie store included.

use crate::{Client, ClientBuilder, Response, Result};
use serde::Serialize;
use std::sync::OnceLock;

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// Returns the process-wide default client, building it on first use.
///
/// # Errors
///
/// Returns an error if the underlying HTTP client cannot be created. A later
/// call tries again.
pub fn default_client() -> Result<&'static Client> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = ClientBuilder::new().build()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

/// Makes a GET request with the default client.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), upstream::Error> {
/// let response = upstream::get("http://10.0.0.1:8080/health").await?;
/// println!("{}", response.status);
/// # Ok(())
/// # }
/// ```
pub async fn get(uri: impl Into<String>) -> Result<Response> {
    default_client()?.get(uri).await
}

/// Makes a POST request with a JSON body with the default client.
pub async fn post<Req>(uri: impl Into<String>, body: &Req) -> Result<Response>
where
    Req: Serialize + ?Sized,
{
    default_client()?.post(uri, body).await
}

/// Makes a PUT request with a JSON body with the default client.
pub async fn put<Req>(uri: impl Into<String>, body: &Req) -> Result<Response>
where
    Req: Serialize + ?Sized,
{
    default_client()?.put(uri, body).await
}

/// Makes a PATCH request with a JSON body with the default client.
pub async fn patch<Req>(uri: impl Into<String>, body: &Req) -> Result<Response>
where
    Req: Serialize + ?Sized,
{
    default_client()?.patch(uri, body).await
}

/// Makes a DELETE request with the default client.
pub async fn delete(uri: impl Into<String>) -> Result<Response> {
    default_client()?.delete(uri).await
}
