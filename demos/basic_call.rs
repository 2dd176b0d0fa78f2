//! Basic example demonstrating simple GET and POST requests.
//!
//! This example shows how to:
//! - Create a client with a base URL
//! - Make GET requests and decode JSON
//! - Make POST requests with a JSON body
//! - Access response metadata
//!
//! Run with: `cargo run --example basic_call`

use serde::{Deserialize, Serialize};
use upstream::{Client, Error};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("upstream=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .build()?;

    println!("=== GET Request Example ===");
    let response = client.get("/posts/1").await?.error_for_status()?;
    let post: Post = response.json()?;

    println!("Post ID: {}", post.id);
    println!("Title: {}", post.title);
    println!("Request latency: {:?}", response.latency);
    println!("Status code: {}", response.status);
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };

    let response = client.post("/posts", &new_post).await?;
    let created: Post = response.json()?;

    println!("Created post ID: {}", created.id);
    println!("Raw response length: {} bytes", response.body.len());
    println!("Content-Type: {:?}", response.header("content-type"));

    Ok(())
}
