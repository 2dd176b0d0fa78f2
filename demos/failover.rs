//! Example demonstrating request-level balancing with failover.
//!
//! This example shows how to:
//! - Configure several base URLs, one of which is unreachable
//! - Enable HTTP balancing with a DNS cache TTL
//! - Observe which upstream served each request
//!
//! Run with: `cargo run --example failover`

use std::time::Duration;
use upstream::{Client, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("upstream=debug,failover=info")
        .init();

    // Port 9 (discard) is normally closed, so connections to it are refused
    // and the balancer moves on to the next upstream.
    let client = Client::builder()
        .base_urls(["http://127.0.0.1:9", "http://httpbin.org"])?
        .http_balance(Duration::from_secs(30))
        .dial_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(10))
        .build()?;

    for i in 0..5 {
        match client.get(format!("/get?attempt={}", i)).await {
            Ok(response) => println!(
                "#{} {} from {} in {:?}",
                i, response.status, response.url, response.latency
            ),
            Err(e) if e.is_retryable() => println!("#{} no upstream reachable: {}", i, e),
            Err(e) => println!("#{} failed: {}", i, e),
        }
    }

    Ok(())
}
