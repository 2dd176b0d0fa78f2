//! # Upstream - an HTTP client that balances over its upstreams
//!
//! Upstream is an HTTP client built on top of `reqwest` for talking to a
//! service that runs on several hosts, each of which may resolve to several
//! addresses. It spreads requests across hosts and addresses, caches DNS
//! answers for a configurable time, and fails over to another address when a
//! connection cannot be established.
//!
//! ## Quick Start
//!
//! ```no_run
//! use upstream::Client;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), upstream::Error> {
//!     let client = Client::builder()
//!         .base_urls(["http://users-a.internal:8080", "http://users-b.internal:8080"])?
//!         .http_balance(Duration::from_secs(30))
//!         .timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     let response = client.get("/users/123").await?.error_for_status()?;
//!     let user: User = response.json()?;
//!     println!("User {} ({}) served by {}", user.name, user.id, response.url);
//!     Ok(())
//! }
//! ```
//!
//! ## Modes
//!
//! - **One base URL**: connections to the host are spread over its DNS
//!   addresses in random order ([`dial::ShuffleResolve`]).
//! - **Several base URLs**: relative requests additionally rotate over the
//!   base URLs, round-robin or at random ([`selector::UpstreamSelector`]).
//! - **HTTP balancing** ([`ClientBuilder::http_balance`]): every request
//!   shuffles the hosts, resolves each through a TTL cache, and tries their
//!   addresses until one accepts the connection ([`HttpBalancer`]).
//!
//! For one-off calls to absolute URLs, [`get`], [`post`], [`put`], [`patch`]
//! and [`delete`] go through a shared default client.
//!
//! ## Failover
//!
//! Only dial-phase failures ([`Error::Connect`]) move a request to another
//! address; a host that does not resolve is skipped. Any failure after the
//! connection exists is returned immediately, because it may have been caused
//! by the request itself:
//!
//! ```no_run
//! use upstream::{Client, Error};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let client = Client::builder()
//!     .base_urls(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])?
//!     .http_balance(Duration::ZERO)
//!     .build()?;
//!
//! match client.get("/jobs").await {
//!     Ok(response) => println!("{}", response.text()),
//!     Err(e) if e.is_retryable() => eprintln!("no upstream reachable: {}", e),
//!     Err(e) => eprintln!("request failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod balancer;
mod client;
pub mod dial;
mod error;
mod global;
pub mod metadata;
pub mod random;
pub mod resolver;
mod response;
pub mod retry;
pub mod selector;

pub use balancer::{HttpBalancer, Sender};
pub use client::{Client, ClientBuilder};
pub use error::{BoxError, Error, Result};
pub use global::{default_client, delete, get, patch, post, put};
pub use random::RandomSource;
pub use response::Response;
pub use retry::{DialPhaseOnly, FailoverPolicy};
pub use selector::Selection;

/// A boxed, `Send` future, used by the object-safe capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
