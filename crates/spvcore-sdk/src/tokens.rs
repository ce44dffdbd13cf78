use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{Error, Result};

/// Verifies token transfers against the token overlay before broadcast.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// "Already verified" is success.
    async fn verify_and_save_token_transfer(&self, tx_hex: &str) -> std::result::Result<(), String>;
}

/// [`TokenVerifier`] talking to the BSV-21 overlay HTTP API.
#[derive(Debug, Clone)]
pub struct TokenOverlayClient {
    http: Client,
    base_url: String,
}

impl TokenOverlayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("token overlay http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Map an overlay response to the verifier contract.
pub fn classify_overlay_response(status: StatusCode, body: &str) -> std::result::Result<(), String> {
    match status.as_u16() {
        201 => {
            log::info!("tokens: token transfer verified and saved in overlay");
            Ok(())
        }
        204 => {
            log::warn!("tokens: token transfer already verified in overlay, probably by the receiver");
            Ok(())
        }
        _ => Err(format!("token overlay returned {status}: {}", body.trim())),
    }
}

#[async_trait]
impl TokenVerifier for TokenOverlayClient {
    async fn verify_and_save_token_transfer(&self, tx_hex: &str) -> std::result::Result<(), String> {
        let response = self
            .http
            .put(format!("{}/api/v1/bsv21/transfer", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(|e| {
                log::error!("tokens: verify and save token transfer request failed: {e}");
                e.to_string()
            })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_overlay_response(status, &body)
    }
}
