use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TransactionStatus;
use crate::tx::Tx;

/// Confirmations value reported when the chain service does not say.
pub const UNKNOWN_CONFIRMATIONS: i64 = -1;

/// Classified failures of the chain service (broadcast gateway and oracle).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("transaction not found")]
    NotFound,

    #[error("chain service unreachable: {0}")]
    Unreachable(String),

    #[error("chain service call interrupted: {0}")]
    Interrupted(String),

    #[error("chain service rejected credentials: {0}")]
    Unauthorized(String),

    #[error("transaction is not in extended format: {0}")]
    NotExtendedFormat(String),

    #[error("transaction fee too low: {0}")]
    FeeTooLow(String),

    #[error("problematic transaction status: {0}")]
    ProblematicStatus(String),

    #[error("chain service could not process the request: {0}")]
    Unprocessable(String),

    #[error("invalid chain service response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Unauthorized, malformed-encoding and fee errors will fail again unchanged.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ChainError::Unauthorized(_) | ChainError::NotExtendedFormat(_) | ChainError::FeeTooLow(_)
        )
    }
}

/// Status reported by the network-acceptance service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Queued,
    Received,
    Stored,
    AnnouncedToNetwork,
    RequestedByNetwork,
    SentToNetwork,
    AcceptedByNetwork,
    SeenInOrphanMempool,
    SeenOnNetwork,
    DoubleSpendAttempted,
    Rejected,
    Mined,
    #[serde(other)]
    Unknown,
}

impl TxStatus {
    pub fn is_problematic(self) -> bool {
        matches!(
            self,
            TxStatus::Rejected | TxStatus::DoubleSpendAttempted | TxStatus::SeenInOrphanMempool
        )
    }

    /// `true` while the service holds the transaction but has not yet
    /// handed it to the network.
    pub fn is_pre_network(self) -> bool {
        matches!(
            self,
            TxStatus::Queued
                | TxStatus::Received
                | TxStatus::Stored
                | TxStatus::AnnouncedToNetwork
                | TxStatus::RequestedByNetwork
                | TxStatus::SentToNetwork
        )
    }

    /// Local status implied by this service status, if any.
    pub fn to_transaction_status(self) -> Option<TransactionStatus> {
        match self {
            TxStatus::Mined => Some(TransactionStatus::Mined),
            s if s.is_problematic() => Some(TransactionStatus::Problematic),
            TxStatus::Unknown => None,
            _ => Some(TransactionStatus::Broadcasted),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Queued => "QUEUED",
            TxStatus::Received => "RECEIVED",
            TxStatus::Stored => "STORED",
            TxStatus::AnnouncedToNetwork => "ANNOUNCED_TO_NETWORK",
            TxStatus::RequestedByNetwork => "REQUESTED_BY_NETWORK",
            TxStatus::SentToNetwork => "SENT_TO_NETWORK",
            TxStatus::AcceptedByNetwork => "ACCEPTED_BY_NETWORK",
            TxStatus::SeenInOrphanMempool => "SEEN_IN_ORPHAN_MEMPOOL",
            TxStatus::SeenOnNetwork => "SEEN_ON_NETWORK",
            TxStatus::DoubleSpendAttempted => "DOUBLE_SPEND_ATTEMPTED",
            TxStatus::Rejected => "REJECTED",
            TxStatus::Mined => "MINED",
            TxStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the chain service knows about a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub txid: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub block_height: i64,
    #[serde(default)]
    pub merkle_path: String,
    pub tx_status: TxStatus,
    #[serde(default)]
    pub extra_info: String,
    #[serde(default)]
    pub competing_txs: Vec<String>,
    #[serde(default = "unknown_confirmations")]
    pub confirmations: i64,
}

fn unknown_confirmations() -> i64 {
    UNKNOWN_CONFIRMATIONS
}

impl TxInfo {
    pub fn new(txid: impl Into<String>, tx_status: TxStatus) -> Self {
        Self {
            txid: txid.into(),
            block_hash: String::new(),
            block_height: 0,
            merkle_path: String::new(),
            tx_status,
            extra_info: String::new(),
            competing_txs: Vec::new(),
            confirmations: UNKNOWN_CONFIRMATIONS,
        }
    }
}

/// How far a transaction must have progressed to count as found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredLevel {
    /// Any status known to the service.
    #[default]
    Any,
    /// The transaction has reached the network.
    InMempool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub required_level: RequiredLevel,
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn in_mempool(timeout: Duration) -> Self {
        Self {
            required_level: RequiredLevel::InMempool,
            timeout: Some(timeout),
        }
    }
}

/// Answers "is this transaction known, and in what state".
///
/// `Ok(None)` means not found. Implementations may also return
/// [`ChainError::NotFound`]; callers normalize it with [`not_found_as_none`].
#[async_trait]
pub trait ChainOracle: Send + Sync {
    async fn query_transaction(
        &self,
        txid: &str,
        opts: QueryOptions,
    ) -> Result<Option<TxInfo>, ChainError>;
}

/// Submits signed transactions to the network-acceptance service.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Tx) -> Result<TxInfo, ChainError>;
}

pub fn not_found_as_none(
    result: Result<Option<TxInfo>, ChainError>,
) -> Result<Option<TxInfo>, ChainError> {
    match result {
        Err(ChainError::NotFound) => Ok(None),
        other => other,
    }
}

/// Apply the required level to a found transaction.
pub fn filter_by_level(info: TxInfo, level: RequiredLevel) -> Option<TxInfo> {
    match level {
        RequiredLevel::InMempool if info.tx_status.is_pre_network() => None,
        _ => Some(info),
    }
}
