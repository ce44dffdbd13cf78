use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spending marker for outputs of a reverted transaction.
pub const DELETED_SPENDING_TX_ID: &str = "deleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub transaction_id: String,
    pub output_index: u32,
    pub xpub_id: String,
    pub satoshis: u64,
    /// Hex locking script.
    pub script_pub_key: String,
    /// Draft currently reserving this output for its spending plan.
    #[serde(default)]
    pub draft_id: Option<String>,
    #[serde(default)]
    pub spending_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Utxo {
    pub fn new(
        transaction_id: impl Into<String>,
        output_index: u32,
        xpub_id: impl Into<String>,
        satoshis: u64,
        script_pub_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: transaction_id.into(),
            output_index,
            xpub_id: xpub_id.into(),
            satoshis,
            script_pub_key: script_pub_key.into(),
            draft_id: None,
            spending_tx_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.transaction_id, self.output_index)
    }

    pub fn is_spent(&self) -> bool {
        self.spending_tx_id.is_some()
    }

    /// Counts toward the owner's balance.
    pub fn is_unspent(&self) -> bool {
        self.spending_tx_id.is_none() && self.deleted_at.is_none()
    }

    /// Spent by a real transaction other than `txid`.
    pub fn is_spent_by_other(&self, txid: &str) -> bool {
        self.spending_tx_id
            .as_deref()
            .is_some_and(|s| s != txid && s != DELETED_SPENDING_TX_ID)
    }
}
