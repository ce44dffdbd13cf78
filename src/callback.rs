use std::sync::Arc;

use thiserror::Error;

use spvcore_sdk::{Engine, Transaction, TxCallback};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("invalid callback body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] spvcore_sdk::Error),
}

impl CallbackError {
    /// HTTP status the callback endpoint answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            CallbackError::Unauthorized => 401,
            CallbackError::BadRequest(_) => 400,
            CallbackError::Engine(spvcore_sdk::Error::TransactionNotFound(_)) => 404,
            CallbackError::Engine(spvcore_sdk::Error::InvalidMerklePath(_)) => 400,
            CallbackError::Engine(_) => 500,
        }
    }
}

/// Entry point for status callbacks pushed by the chain service.
///
/// Transport agnostic: whatever serves the callback URL hands over the
/// `Authorization` header value and the raw body.
pub struct CallbackHandler {
    engine: Arc<Engine>,
    token: String,
}

/// Compare without stopping at the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl CallbackHandler {
    pub fn new(engine: Arc<Engine>, token: impl Into<String>) -> Self {
        Self {
            engine,
            token: token.into(),
        }
    }

    fn authorize(&self, authorization: Option<&str>) -> Result<(), CallbackError> {
        if self.token.is_empty() {
            return Ok(());
        }
        match authorization.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(presented) if tokens_match(presented.trim(), &self.token) => Ok(()),
            _ => Err(CallbackError::Unauthorized),
        }
    }

    pub async fn handle(
        &self,
        authorization: Option<&str>,
        body: &str,
    ) -> Result<Transaction, CallbackError> {
        self.authorize(authorization)?;
        let callback: TxCallback =
            serde_json::from_str(body).map_err(|e| CallbackError::BadRequest(e.to_string()))?;
        log::debug!("callback: {} reported {}", callback.tx_id, callback.tx_status);
        match self.engine.update_transaction(&callback).await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                log::warn!("callback: rejected update for {}: {e}", callback.tx_id);
                Err(e.into())
            }
        }
    }
}
