use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Metadata;
use crate::error::Result;
use crate::tx::Tx;

/// Replaces owner attribution on a reverted transaction.
pub const REVERTED_SENTINEL: &str = "reverted";

pub const META_XPUB_IN_IDS: &str = "XpubInIDs";
pub const META_XPUB_OUT_IDS: &str = "XpubOutIDs";
pub const META_XPUB_OUTPUT_VALUE: &str = "XpubOutputValue";
/// Checkpoint written once a revert has reversed the balance deltas.
pub const META_REVERT_BALANCE_APPLIED: &str = "revertBalanceApplied";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Created,
    Broadcasted,
    Mined,
    Problematic,
    Reverted,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Broadcasted => "broadcasted",
            Self::Mined => "mined",
            Self::Problematic => "problematic",
            Self::Reverted => "reverted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "broadcasted" => Some(Self::Broadcasted),
            "mined" => Some(Self::Mined),
            "problematic" => Some(Self::Problematic),
            "reverted" => Some(Self::Reverted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction ID of `hex`. Never changes once assigned.
    pub id: String,
    /// Empty for transactions not negotiated through a draft.
    #[serde(default)]
    pub draft_id: String,
    /// Owner the transaction was recorded for; not persisted separately.
    #[serde(skip)]
    pub xpub_id: String,
    pub hex: String,
    /// `None` for legacy records that predate status tracking.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub xpub_in_ids: Vec<String>,
    #[serde(default)]
    pub xpub_out_ids: Vec<String>,
    /// Net satoshi change per owner.
    #[serde(default)]
    pub xpub_output_value: BTreeMap<String, i64>,
    #[serde(default)]
    pub total_value: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub number_of_inputs: u32,
    #[serde(default)]
    pub number_of_outputs: u32,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub block_height: u64,
    /// BUMP hex once mined.
    #[serde(default)]
    pub merkle_path: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(tx: &Tx) -> Self {
        let now = Utc::now();
        Self {
            id: tx.txid(),
            draft_id: String::new(),
            xpub_id: String::new(),
            hex: tx.to_hex(),
            status: None,
            xpub_in_ids: Vec::new(),
            xpub_out_ids: Vec::new(),
            xpub_output_value: BTreeMap::new(),
            total_value: 0,
            fee: 0,
            number_of_inputs: tx.inputs.len() as u32,
            number_of_outputs: tx.outputs.len() as u32,
            block_hash: String::new(),
            block_height: 0,
            merkle_path: String::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn parsed(&self) -> Result<Tx> {
        Tx::from_hex(&self.hex)
    }

    pub fn is_reverted(&self) -> bool {
        self.status == Some(TransactionStatus::Reverted)
    }

    /// Set a new status; returns `false` when it is already current.
    pub fn set_status(&mut self, status: TransactionStatus) -> bool {
        if self.status == Some(status) {
            return false;
        }
        self.status = Some(status);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        for status in [
            TransactionStatus::Created,
            TransactionStatus::Broadcasted,
            TransactionStatus::Mined,
            TransactionStatus::Problematic,
            TransactionStatus::Reverted,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::parse(""), None);
    }

    #[test]
    fn set_status_reports_change() {
        let tx = Tx {
            version: 1,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
        };
        let mut record = Transaction::new(&tx);
        assert!(record.set_status(TransactionStatus::Created));
        assert!(!record.set_status(TransactionStatus::Created));
        assert!(record.set_status(TransactionStatus::Broadcasted));
    }
}
