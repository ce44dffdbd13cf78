//! Client for the ARC transaction processor: broadcast gateway and chain oracle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::chain::{Broadcaster, ChainError, ChainOracle, QueryOptions, TxInfo, filter_by_level};
use crate::ef::EfConverter;
use crate::error::{Error, Result};
use crate::tx::Tx;

const STATUS_NOT_EXTENDED_FORMAT: u16 = 460;
const STATUS_FEE_TOO_LOW: u16 = 465;
const STATUS_CUMULATIVE_FEE_VALIDATION_FAILED: u16 = 473;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArcCallback {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcConfig {
    pub url: String,
    pub token: String,
    pub deployment_id: String,
    /// Status ARC should reach before answering a broadcast, e.g. `SEEN_ON_NETWORK`.
    pub wait_for: String,
    pub callback: Option<ArcCallback>,
    pub timeout: Duration,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            url: "https://arc.taal.com".to_string(),
            token: String::new(),
            deployment_id: String::new(),
            wait_for: String::new(),
            callback: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ArcConfig {
    pub fn callback_enabled(&self) -> bool {
        self.callback.as_ref().is_some_and(|cb| !cb.url.is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastBody {
    /// Raw or Extended Format hex, despite the name.
    raw_tx: String,
}

/// RFC 7807 style error body returned by ARC.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArcErrorBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    extra_info: String,
}

fn error_detail(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ArcErrorBody>(body) {
        Ok(err) if !err.title.is_empty() || !err.detail.is_empty() => {
            let mut msg = format!("{status} {}: {}", err.title, err.detail);
            if !err.extra_info.is_empty() {
                msg.push_str(&format!(" ({})", err.extra_info));
            }
            msg
        }
        _ => format!("{status}: {}", body.trim()),
    }
}

/// Classify the response to `POST /v1/tx`.
pub fn classify_broadcast_response(status: StatusCode, body: &str) -> std::result::Result<TxInfo, ChainError> {
    match status.as_u16() {
        200 => {
            let info: TxInfo = serde_json::from_str(body)
                .map_err(|e| ChainError::InvalidResponse(format!("broadcast response: {e}")))?;
            if info.tx_status.is_problematic() {
                return Err(ChainError::ProblematicStatus(format!(
                    "ARC problematic tx status: {}",
                    info.tx_status
                )));
            }
            Ok(info)
        }
        401 | 403 | 404 => Err(ChainError::Unauthorized(error_detail(status, body))),
        STATUS_NOT_EXTENDED_FORMAT => Err(ChainError::NotExtendedFormat(error_detail(status, body))),
        STATUS_FEE_TOO_LOW | STATUS_CUMULATIVE_FEE_VALIDATION_FAILED => {
            Err(ChainError::FeeTooLow(error_detail(status, body)))
        }
        _ => Err(ChainError::Unprocessable(error_detail(status, body))),
    }
}

/// Classify the response to `GET /v1/tx/{txid}`; 404 is "not found".
pub fn classify_query_response(
    status: StatusCode,
    body: &str,
) -> std::result::Result<Option<TxInfo>, ChainError> {
    match status.as_u16() {
        200 => serde_json::from_str(body)
            .map(Some)
            .map_err(|e| ChainError::InvalidResponse(format!("query response: {e}"))),
        404 => Ok(None),
        401 | 403 => Err(ChainError::Unauthorized(error_detail(status, body))),
        _ => Err(ChainError::Unprocessable(error_detail(status, body))),
    }
}

fn wrap_request_error(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Interrupted(e.to_string())
    } else {
        ChainError::Unreachable(e.to_string())
    }
}

/// [`Broadcaster`] and [`ChainOracle`] backed by an ARC deployment.
#[derive(Clone)]
pub struct ArcService {
    http: Client,
    config: ArcConfig,
    ef_converter: Option<EfConverter>,
}

impl ArcService {
    pub fn new(config: ArcConfig, ef_converter: Option<EfConverter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("arc http client: {e}")))?;
        Ok(Self {
            http,
            config,
            ef_converter,
        })
    }

    pub fn config(&self) -> &ArcConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn with_common_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        if !self.config.token.is_empty() {
            request = request.bearer_auth(&self.config.token);
        }
        if !self.config.deployment_id.is_empty() {
            request = request.header("XDeployment-ID", &self.config.deployment_id);
        }
        request
    }

    fn with_broadcast_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(cb) = self.config.callback.as_ref().filter(|cb| !cb.url.is_empty()) {
            request = request.header("X-CallbackUrl", &cb.url);
            if !cb.token.is_empty() {
                request = request.header("X-CallbackToken", &cb.token);
            }
        }
        if !self.config.wait_for.is_empty() {
            request = request.header("X-WaitFor", &self.config.wait_for);
        }
        request
    }

    /// Extended Format when every source is known, raw hex otherwise.
    fn prepare_tx_hex(&self, tx: &Tx) -> String {
        let converted = match &self.ef_converter {
            Some(converter) => converter.convert(tx),
            None => tx.to_ef_hex(),
        };
        match converted {
            Ok(ef_hex) => ef_hex,
            Err(e) => {
                // expected for transactions funded from outside the wallet
                log::info!("arc: could not convert {} to EF ({e}), using raw hex", tx.txid());
                tx.to_hex()
            }
        }
    }
}

#[async_trait]
impl Broadcaster for ArcService {
    async fn broadcast(&self, tx: &Tx) -> std::result::Result<TxInfo, ChainError> {
        let body = BroadcastBody {
            raw_tx: self.prepare_tx_hex(tx),
        };
        let request = self.with_broadcast_headers(
            self.with_common_headers(self.http.post(self.url("v1/tx")).json(&body)),
        );
        let response = request.send().await.map_err(wrap_request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(wrap_request_error)?;
        let result = classify_broadcast_response(status, &text);
        match &result {
            Ok(info) => log::debug!("arc: broadcast {} -> {}", tx.txid(), info.tx_status),
            Err(e) => log::warn!("arc: broadcast {} failed: {e}", tx.txid()),
        }
        result
    }
}

#[async_trait]
impl ChainOracle for ArcService {
    async fn query_transaction(
        &self,
        txid: &str,
        opts: QueryOptions,
    ) -> std::result::Result<Option<TxInfo>, ChainError> {
        let mut request = self.with_common_headers(self.http.get(self.url(&format!("v1/tx/{txid}"))));
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(wrap_request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(wrap_request_error)?;
        let info = classify_query_response(status, &text)?;
        Ok(info.and_then(|info| filter_by_level(info, opts.required_level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TxStatus;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn broadcast_success() {
        let info = classify_broadcast_response(
            status(200),
            r#"{"txid":"ab","txStatus":"SEEN_ON_NETWORK","blockHeight":0}"#,
        )
        .unwrap();
        assert_eq!(info.tx_status, TxStatus::SeenOnNetwork);
    }

    #[test]
    fn broadcast_ok_with_problematic_status_is_an_error() {
        let err = classify_broadcast_response(
            status(200),
            r#"{"txid":"ab","txStatus":"DOUBLE_SPEND_ATTEMPTED"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::ProblematicStatus(_)));
    }

    #[test]
    fn broadcast_error_codes() {
        let body = r#"{"title":"Fee too low","detail":"minimum is 1 sat/kB"}"#;
        for code in [401, 403, 404] {
            assert!(matches!(
                classify_broadcast_response(status(code), body),
                Err(ChainError::Unauthorized(_))
            ));
        }
        assert!(matches!(
            classify_broadcast_response(status(460), body),
            Err(ChainError::NotExtendedFormat(_))
        ));
        for code in [465, 473] {
            match classify_broadcast_response(status(code), body) {
                Err(ChainError::FeeTooLow(detail)) => assert!(detail.contains("minimum is 1 sat/kB")),
                other => panic!("unexpected {other:?}"),
            }
        }
        match classify_broadcast_response(status(422), "plain failure") {
            Err(ChainError::Unprocessable(detail)) => assert!(detail.contains("plain failure")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify_broadcast_response(status(200), "not json"),
            Err(ChainError::InvalidResponse(_))
        ));
    }

    #[test]
    fn query_not_found() {
        assert_eq!(classify_query_response(status(404), ""), Ok(None));
        assert!(matches!(
            classify_query_response(status(401), ""),
            Err(ChainError::Unauthorized(_))
        ));
        let found = classify_query_response(status(200), r#"{"txid":"ab","txStatus":"MINED"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(found.tx_status, TxStatus::Mined);
    }

    #[test]
    fn callback_flag() {
        let mut config = ArcConfig::default();
        assert!(!config.callback_enabled());
        config.callback = Some(ArcCallback {
            url: "https://wallet.example.com/transaction/broadcast/callback".into(),
            token: "secret".into(),
        });
        assert!(config.callback_enabled());
    }
}
