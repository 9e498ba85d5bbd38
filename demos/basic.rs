use std::time::Duration;

use dispatch_http::{ApiClient, CallContext, ClientOptions};
use reqwest::header::{self, HeaderValue};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("DISPATCH_HTTP_BASE_URL")?;
    let token = std::env::var("DISPATCH_HTTP_TOKEN")?;

    let client = ApiClient::new(base_url)
        .with_options(ClientOptions {
            max_retries: 4,
            ..ClientOptions::default()
        })
        .with_default_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

    let ctx = CallContext::new().with_timeout(Duration::from_secs(60));
    let reply: Value = client
        .post_json(&ctx, "/v1/messages", &json!({ "prompt": "What is a quaternion?" }))
        .await?;

    println!("{reply:#}");
    Ok(())
}
