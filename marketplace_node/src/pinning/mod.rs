//! Content pinning to IPFS through a Pinata-compatible pinning service.
//!
//! The pinner makes exactly one outbound call per `pin` and never retries;
//! every failure (transport, non-2xx, malformed body) is flattened into a
//! `PinError` carrying a human-readable cause.

use async_trait::async_trait;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::config::PinningConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedContent {
    pub content_id: String,
    pub retrieval_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PinError {
    pub message: String,
}

impl PinError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ContentPinner: Send + Sync {
    async fn pin(&self, document: &serde_json::Value) -> Result<PinnedContent, PinError>;
}

/// Pinning client for the `pinJSONToIPFS` endpoint.
pub struct PinataPinner {
    client: reqwest::Client,
    endpoint: String,
    gateway_url: String,
    jwt: String,
}

impl PinataPinner {
    pub fn new(config: &PinningConfig) -> Result<Self, PinError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| PinError::new(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            gateway_url: config.gateway_url.clone(),
            jwt: config.jwt.clone(),
        })
    }
}

#[async_trait]
impl ContentPinner for PinataPinner {
    async fn pin(&self, document: &serde_json::Value) -> Result<PinnedContent, PinError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.jwt)
            .json(&serde_json::json!({ "pinataContent": document }))
            .send()
            .await
            .map_err(|e| {
                error!("Pinning request failed: {}", e);
                PinError::new(format!("Pinning request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Pinning service returned {}: {}", status, body);
            return Err(PinError::new(format!(
                "Pinning service returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PinError::new(format!("Failed to parse pinning response: {}", e)))?;

        let pinned = parse_pin_response(&self.gateway_url, &body)?;
        info!("Pinned document as {}", pinned.content_id);
        Ok(pinned)
    }
}

/// Extract the content identifier from a pinning response and derive the
/// gateway retrieval URL.
pub fn parse_pin_response(gateway_url: &str, body: &serde_json::Value) -> Result<PinnedContent, PinError> {
    let content_id = body
        .get("IpfsHash")
        .and_then(|v| v.as_str())
        .filter(|cid| !cid.is_empty())
        .ok_or_else(|| PinError::new("Malformed pinning response: missing IpfsHash"))?;

    let retrieval_url = format!("{}/{}", gateway_url.trim_end_matches('/'), content_id);

    Ok(PinnedContent {
        content_id: content_id.to_string(),
        retrieval_url,
    })
}
