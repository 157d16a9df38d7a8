//! HTTP health probes against a single address.

use std::time::Duration;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::protocol::{HEALTH_PATH, SERVER_HEALTH_PATH};
use shared::types::{
    Address, HealthErrorResponse, HealthPollerResult, HealthResponse, PollOutcome,
    ServerHealthResponse,
};
use crate::error::Result;

/// Build the client shared by every probe. `timeout` bounds each request.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()?;
    Ok(client)
}

/// Run both health requests against `address` concurrently. Never fails.
pub async fn poll_address(client: &reqwest::Client, address: &Address) -> HealthPollerResult {
    let health_url = address.url(HEALTH_PATH);
    let server_health_url = address.url(SERVER_HEALTH_PATH);

    let (health, server_health) = tokio::join!(
        fetch::<HealthResponse>(client, &health_url),
        fetch::<ServerHealthResponse>(client, &server_health_url),
    );

    HealthPollerResult {
        ip: address.ip.clone(),
        port: address.port,
        health,
        server_health,
    }
}

/// GET `url` and classify the outcome. Any 2xx answer counts as success and
/// yields whatever part of the payload could be parsed.
pub async fn fetch<T>(client: &reqwest::Client, url: &str) -> PollOutcome<T>
where
    T: DeserializeOwned + Default,
{
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::trace!("Health request to {} failed: {}", url, e);
            return Err(HealthErrorResponse::unreachable(e.to_string()));
        }
    };

    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            tracing::trace!("Reading health response from {} failed: {}", url, e);
            return Err(HealthErrorResponse::unreachable(e.to_string()));
        }
    };

    if !status.is_success() {
        return Err(HealthErrorResponse::not_ok(status.as_u16(), parse_body(text)));
    }

    match serde_json::from_value::<T>(parse_body(text)) {
        Ok(payload) => Ok(payload),
        Err(e) => {
            tracing::debug!("Unexpected health payload from {}: {}", url, e);
            Ok(T::default())
        }
    }
}

/// Error bodies are kept as JSON when they are JSON, as text otherwise
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
