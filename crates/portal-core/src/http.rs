//! Shared HTTP plumbing for the adapters.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::platform;

pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .user_agent(platform::USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// GET `url` and decode the body as JSON. Non-2xx is an error.
///
/// Logs the request URL, the HTTP status and whether the body parsed.
pub async fn get_json(client: &Client, url: &str) -> Result<Value, FetchError> {
    info!(url, "GET");
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            warn!(url, "request failed: {}", e);
            FetchError::from(e)
        })?;

    let status = response.status();
    info!(url, status = status.as_u16(), "response");
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = response.bytes().await?;
    match serde_json::from_slice::<Value>(&body) {
        Ok(json) => {
            debug!(url, json_ok = true, bytes = body.len(), "parsed JSON body");
            Ok(json)
        }
        Err(e) => {
            warn!(url, json_ok = false, "JSON parse failed: {}", e);
            Err(e.into())
        }
    }
}

/// GET `url` and return the raw body. Non-2xx is an error.
pub async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    debug!(url, status = status.as_u16(), "response");
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(response.bytes().await?.to_vec())
}
