//! Shared HTTP client and fetch helpers for the API and feed adapters.
//!
//! The helpers never fail: a network error, a non-success status, or an
//! undecodable body is logged at `warn` and reported as `None`, so callers
//! can treat "nothing fetched" and "nothing found" the same way.

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// User agent sent by the feed and API adapters.
pub const USER_AGENT: &str = "ProspectorBot/1.0";

/// Build the client used by the non-browser adapters.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// GET `url` and return the body as text.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "request failed");
            return None;
        }
    };
    let status = response.status();
    if !status.is_success() {
        warn!(url, status = %status, "unexpected status");
        return None;
    }
    match response.text().await {
        Ok(body) => Some(body),
        Err(e) => {
            warn!(url, error = %e, "failed to read body");
            None
        }
    }
}

/// GET `url` and decode the body as JSON.
pub async fn fetch_json(client: &reqwest::Client, url: &str) -> Option<Value> {
    let body = fetch_text(client, url).await?;
    match serde_json::from_str(&body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(url, error = %e, "invalid JSON payload");
            None
        }
    }
}
