use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tx::hash_hex;

/// Stable identifier of an owner: hex SHA-256 of the raw extended public key.
pub fn xpub_id(raw_xpub: &str) -> String {
    hash_hex(raw_xpub)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Xpub {
    pub id: String,
    /// Cached sum of the owner's unspent outputs.
    pub current_balance: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Xpub {
    pub fn new(raw_xpub: &str) -> Self {
        let now = Utc::now();
        Self {
            id: xpub_id(raw_xpub),
            current_balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
