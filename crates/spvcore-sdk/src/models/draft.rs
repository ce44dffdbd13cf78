use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Complete,
    Expired,
    Canceled,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Complete => "complete",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "complete" => Some(Self::Complete),
            "expired" => Some(Self::Expired),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// What happens to a recorded transaction after it is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub broadcast: bool,
    pub broadcast_instant: bool,
    #[serde(rename = "paymailP2p")]
    pub paymail_p2p: bool,
    pub sync_on_chain: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broadcast: true,
            broadcast_instant: true,
            paymail_p2p: true,
            sync_on_chain: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUnit {
    pub satoshis: u64,
    pub bytes: u64,
}

impl Default for FeeUnit {
    fn default() -> Self {
        Self {
            satoshis: 1,
            bytes: 1000,
        }
    }
}

impl FeeUnit {
    /// Fee for a transaction of `size` bytes, rounded up.
    pub fn fee_for(&self, size: u64) -> u64 {
        let bytes = self.bytes.max(1);
        (size * self.satoshis).div_ceil(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInputRef {
    pub source_tx_id: String,
    pub output_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionType {
    #[default]
    Basic,
    P2p,
}

/// Paymail resolution data for an output paid to a paymail address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymailP4 {
    pub alias: String,
    pub domain: String,
    #[serde(default)]
    pub from_paymail: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub pub_key: String,
    /// P2P receive-transaction endpoint.
    #[serde(default)]
    pub receive_endpoint: String,
    #[serde(default)]
    pub reference_id: String,
    #[serde(default)]
    pub resolution_type: ResolutionType,
}

impl PaymailP4 {
    pub fn address(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutputConfig {
    /// Address or paymail the output pays.
    #[serde(default)]
    pub to: String,
    /// Hex locking script.
    pub locking_script: String,
    pub satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymail_p4: Option<PaymailP4>,
}

impl TxOutputConfig {
    pub fn is_p2p(&self) -> bool {
        self.paymail_p4
            .as_ref()
            .is_some_and(|p| p.resolution_type == ResolutionType::P2p)
    }
}

/// Spending plan of a draft. Frozen once the draft is first saved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfig {
    #[serde(default)]
    pub inputs: Vec<TxInputRef>,
    #[serde(default)]
    pub outputs: Vec<TxOutputConfig>,
    /// Hex locking script receiving the change; must be registered to the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_destination: Option<String>,
    #[serde(default)]
    pub change_satoshis: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_unit: Option<FeeUnit>,
    /// Absent means every step is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

impl TransactionConfig {
    pub fn effective_sync(&self) -> SyncConfig {
        self.sync.unwrap_or_default()
    }

    pub fn has_p2p_outputs(&self) -> bool {
        self.outputs.iter().any(TxOutputConfig::is_p2p)
    }

    pub fn total_output_satoshis(&self) -> u64 {
        self.outputs.iter().map(|o| o.satoshis).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftTransaction {
    pub id: String,
    pub xpub_id: String,
    pub configuration: TransactionConfig,
    pub status: DraftStatus,
    /// Unsigned transaction of the spending plan.
    pub hex: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_tx_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftTransaction {
    /// A draft whose UTXO reservations still hold.
    pub fn holds_reservations(&self, now: DateTime<Utc>) -> bool {
        self.status == DraftStatus::Draft && self.expires_at > now
    }
}
