use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A locking script registered to an owner. Outputs paying it are the owner's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Hex locking script; primary key.
    pub locking_script: String,
    pub xpub_id: String,
    #[serde(default)]
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl Destination {
    pub fn new(locking_script: impl Into<String>, xpub_id: impl Into<String>) -> Self {
        Self {
            locking_script: locking_script.into(),
            xpub_id: xpub_id.into(),
            address: String::new(),
            created_at: Utc::now(),
        }
    }
}
