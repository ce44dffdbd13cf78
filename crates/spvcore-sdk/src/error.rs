use thiserror::Error;

use crate::chain::ChainError;

#[derive(Debug, Error)]
pub enum Error {
    // --- validation ---
    #[error("missing transaction: a parsed transaction is required")]
    MissingTransaction,

    #[error("empty related draft id")]
    EmptyRelatedDraftId,

    #[error("empty xpub key")]
    EmptyXpubKey,

    #[error("transaction configuration has no outputs")]
    EmptyOutputs,

    #[error("output {0} has no locking script")]
    MissingLockingScript(usize),

    #[error("output {0} has zero satoshis")]
    ZeroOutputValue(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("transaction decode error: {0}")]
    TxDecode(String),

    #[error("invalid merkle path: {0}")]
    InvalidMerklePath(String),

    // --- not found ---
    #[error("draft transaction not found: {0}")]
    DraftNotFound(String),

    #[error("draft transaction has no outputs")]
    DraftHasNoOutputs,

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("xpub not found: {0}")]
    XpubNotFound(String),

    #[error("utxo not found: {txid}:{vout}")]
    UtxoNotFound { txid: String, vout: u32 },

    // --- ledger ---
    #[error("utxo {txid}:{vout} already spent by {spending_tx_id}")]
    UtxoAlreadySpent {
        txid: String,
        vout: u32,
        spending_tx_id: String,
    },

    #[error("utxo {txid}:{vout} does not belong to xpub {xpub_id}")]
    UtxoNotOwned {
        txid: String,
        vout: u32,
        xpub_id: String,
    },

    #[error("utxo {txid}:{vout} is reserved by draft {draft_id}")]
    UtxoReserved {
        txid: String,
        vout: u32,
        draft_id: String,
    },

    #[error("insufficient UTXOs: {0}")]
    InsufficientUtxos(String),

    #[error("excess UTXO value with no change destination provided")]
    MissingChangeDestination,

    #[error("change destination {0} is not registered to this xpub")]
    UnknownChangeDestination(String),

    #[error("balance arithmetic overflow for xpub {0}")]
    BalanceOverflow(String),

    #[error("draft {0} configuration is immutable once saved")]
    DraftConfigurationImmutable(String),

    #[error("transaction id mismatch: record {expected}, serialized form hashes to {found}")]
    TxIdMismatch { expected: String, found: String },

    // --- recording ---
    #[error("failed to create outgoing transaction: {0}")]
    CreateOutgoingTx(#[source] Box<Error>),

    #[error("P2P notification failed ({outcome}): {cause}")]
    P2pNotification {
        cause: String,
        outcome: CompensationOutcome,
    },

    #[error("token transfer validation failed: {0}")]
    TokenValidation(String),

    #[error("paymail notifier is not configured")]
    NotifierNotConfigured,

    // --- compensation ---
    #[error("not an engine originating transaction, cannot revert")]
    RevertNotFromDraft,

    #[error("could not find the draft transaction for this transaction, cannot revert")]
    RevertDraftMissing,

    #[error("transaction was found on-chain, cannot revert")]
    RevertFoundOnChain,

    #[error("utxo {txid}:{vout} of this transaction has been spent by {spending_tx_id}, cannot revert")]
    RevertOutputSpent {
        txid: String,
        vout: u32,
        spending_tx_id: String,
    },

    // --- infrastructure ---
    #[error("chain service error: {0}")]
    Chain(#[from] ChainError),

    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("timed out waiting for lock {0}")]
    LockTimeout(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// A block height reported by an external service does not fit the
    /// unsigned height domain. Never retried; the record is left untouched.
    #[error("invalid block height reported by chain service: {0}")]
    InvalidBlockHeight(i64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `true` for errors caused by bad caller input (fail fast, no side effects).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MissingTransaction
                | Error::EmptyRelatedDraftId
                | Error::EmptyXpubKey
                | Error::EmptyOutputs
                | Error::MissingLockingScript(_)
                | Error::ZeroOutputValue(_)
                | Error::InvalidHex(_)
                | Error::TxDecode(_)
                | Error::InvalidMerklePath(_)
        )
    }

    /// `true` for not-found errors on drafts, transactions, xpubs and UTXOs.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DraftNotFound(_)
                | Error::TransactionNotFound(_)
                | Error::XpubNotFound(_)
                | Error::UtxoNotFound { .. }
        )
    }
}

/// What the outgoing recorder did with a transaction whose P2P notification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Reverted,
    MarkedProblematic,
}

impl std::fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompensationOutcome::Reverted => write!(f, "transaction reverted"),
            CompensationOutcome::MarkedProblematic => write!(f, "transaction marked problematic"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
