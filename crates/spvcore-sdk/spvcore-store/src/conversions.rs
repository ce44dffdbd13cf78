use chrono::{DateTime, SecondsFormat, Utc};
use spvcore_sdk::models::{
    Destination, DraftStatus, DraftTransaction, SyncStatus, SyncTransaction, Transaction,
    TransactionStatus, Utxo, Xpub,
};

use crate::error::StoreError;
use crate::models::{DestinationRow, DraftRow, SyncTransactionRow, TransactionRow, UtxoRow, XpubRow};

/// Fixed-width RFC 3339 so that text order is time order.
pub fn ts_to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn text_to_ts(s: &str, field: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("{field}: {e}")))
}

fn opt_ts(s: Option<&str>, field: &str) -> std::result::Result<Option<DateTime<Utc>>, StoreError> {
    s.map(|s| text_to_ts(s, field)).transpose()
}

pub fn to_i64(v: u64, field: &str) -> std::result::Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field}: {v} out of range")))
}

fn to_u64(v: i64, field: &str) -> std::result::Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field}: negative value {v}")))
}

fn to_u32(v: i32, field: &str) -> std::result::Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field}: negative value {v}")))
}

fn to_i32(v: u32, field: &str) -> std::result::Result<i32, StoreError> {
    i32::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field}: {v} out of range")))
}

fn sync_status(s: &str) -> std::result::Result<SyncStatus, StoreError> {
    SyncStatus::parse(s).ok_or_else(|| StoreError::InvalidData(format!("invalid sync status: {s}")))
}

// --- Xpub ---

impl TryFrom<&Xpub> for XpubRow {
    type Error = StoreError;

    fn try_from(x: &Xpub) -> std::result::Result<Self, Self::Error> {
        Ok(XpubRow {
            id: x.id.clone(),
            current_balance: to_i64(x.current_balance, "current_balance")?,
            created_at: ts_to_text(&x.created_at),
            updated_at: ts_to_text(&x.updated_at),
        })
    }
}

impl TryFrom<XpubRow> for Xpub {
    type Error = StoreError;

    fn try_from(row: XpubRow) -> std::result::Result<Self, Self::Error> {
        Ok(Xpub {
            current_balance: to_u64(row.current_balance, "current_balance")?,
            created_at: text_to_ts(&row.created_at, "created_at")?,
            updated_at: text_to_ts(&row.updated_at, "updated_at")?,
            id: row.id,
        })
    }
}

// --- Destination ---

impl From<&Destination> for DestinationRow {
    fn from(d: &Destination) -> Self {
        DestinationRow {
            locking_script: d.locking_script.clone(),
            xpub_id: d.xpub_id.clone(),
            address: d.address.clone(),
            created_at: ts_to_text(&d.created_at),
        }
    }
}

impl TryFrom<DestinationRow> for Destination {
    type Error = StoreError;

    fn try_from(row: DestinationRow) -> std::result::Result<Self, Self::Error> {
        Ok(Destination {
            created_at: text_to_ts(&row.created_at, "created_at")?,
            locking_script: row.locking_script,
            xpub_id: row.xpub_id,
            address: row.address,
        })
    }
}

// --- DraftTransaction ---

impl TryFrom<&DraftTransaction> for DraftRow {
    type Error = StoreError;

    fn try_from(d: &DraftTransaction) -> std::result::Result<Self, Self::Error> {
        Ok(DraftRow {
            id: d.id.clone(),
            xpub_id: d.xpub_id.clone(),
            configuration: serde_json::to_string(&d.configuration)?,
            status: d.status.as_str().to_string(),
            hex: d.hex.clone(),
            expires_at: ts_to_text(&d.expires_at),
            final_tx_id: d.final_tx_id.clone(),
            metadata: serde_json::to_string(&d.metadata)?,
            created_at: ts_to_text(&d.created_at),
            updated_at: ts_to_text(&d.updated_at),
        })
    }
}

impl TryFrom<DraftRow> for DraftTransaction {
    type Error = StoreError;

    fn try_from(row: DraftRow) -> std::result::Result<Self, Self::Error> {
        let status = DraftStatus::parse(&row.status)
            .ok_or_else(|| StoreError::InvalidData(format!("invalid draft status: {}", row.status)))?;
        Ok(DraftTransaction {
            configuration: serde_json::from_str(&row.configuration)?,
            status,
            expires_at: text_to_ts(&row.expires_at, "expires_at")?,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: text_to_ts(&row.created_at, "created_at")?,
            updated_at: text_to_ts(&row.updated_at, "updated_at")?,
            id: row.id,
            xpub_id: row.xpub_id,
            hex: row.hex,
            final_tx_id: row.final_tx_id,
        })
    }
}

// --- Transaction ---

impl TryFrom<&Transaction> for TransactionRow {
    type Error = StoreError;

    fn try_from(t: &Transaction) -> std::result::Result<Self, Self::Error> {
        Ok(TransactionRow {
            id: t.id.clone(),
            draft_id: t.draft_id.clone(),
            xpub_id: t.xpub_id.clone(),
            hex: t.hex.clone(),
            tx_status: t.status.map(|s| s.as_str().to_string()).unwrap_or_default(),
            xpub_in_ids: serde_json::to_string(&t.xpub_in_ids)?,
            xpub_out_ids: serde_json::to_string(&t.xpub_out_ids)?,
            xpub_output_value: serde_json::to_string(&t.xpub_output_value)?,
            total_value: to_i64(t.total_value, "total_value")?,
            fee: to_i64(t.fee, "fee")?,
            number_of_inputs: to_i32(t.number_of_inputs, "number_of_inputs")?,
            number_of_outputs: to_i32(t.number_of_outputs, "number_of_outputs")?,
            block_hash: t.block_hash.clone(),
            block_height: to_i64(t.block_height, "block_height")?,
            merkle_path: t.merkle_path.clone(),
            metadata: serde_json::to_string(&t.metadata)?,
            created_at: ts_to_text(&t.created_at),
            updated_at: ts_to_text(&t.updated_at),
            deleted_at: t.deleted_at.as_ref().map(ts_to_text),
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> std::result::Result<Self, Self::Error> {
        let status = match row.tx_status.as_str() {
            "" => None,
            s => Some(TransactionStatus::parse(s).ok_or_else(|| {
                StoreError::InvalidData(format!("invalid transaction status: {s}"))
            })?),
        };
        Ok(Transaction {
            status,
            xpub_in_ids: serde_json::from_str(&row.xpub_in_ids)?,
            xpub_out_ids: serde_json::from_str(&row.xpub_out_ids)?,
            xpub_output_value: serde_json::from_str(&row.xpub_output_value)?,
            total_value: to_u64(row.total_value, "total_value")?,
            fee: to_u64(row.fee, "fee")?,
            number_of_inputs: to_u32(row.number_of_inputs, "number_of_inputs")?,
            number_of_outputs: to_u32(row.number_of_outputs, "number_of_outputs")?,
            block_height: to_u64(row.block_height, "block_height")?,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: text_to_ts(&row.created_at, "created_at")?,
            updated_at: text_to_ts(&row.updated_at, "updated_at")?,
            deleted_at: opt_ts(row.deleted_at.as_deref(), "deleted_at")?,
            id: row.id,
            draft_id: row.draft_id,
            xpub_id: row.xpub_id,
            hex: row.hex,
            block_hash: row.block_hash,
            merkle_path: row.merkle_path,
        })
    }
}

// --- Utxo ---

impl TryFrom<&Utxo> for UtxoRow {
    type Error = StoreError;

    fn try_from(u: &Utxo) -> std::result::Result<Self, Self::Error> {
        Ok(UtxoRow {
            transaction_id: u.transaction_id.clone(),
            output_index: to_i32(u.output_index, "output_index")?,
            xpub_id: u.xpub_id.clone(),
            satoshis: to_i64(u.satoshis, "satoshis")?,
            script_pub_key: u.script_pub_key.clone(),
            draft_id: u.draft_id.clone(),
            spending_tx_id: u.spending_tx_id.clone(),
            created_at: ts_to_text(&u.created_at),
            updated_at: ts_to_text(&u.updated_at),
            deleted_at: u.deleted_at.as_ref().map(ts_to_text),
        })
    }
}

impl TryFrom<UtxoRow> for Utxo {
    type Error = StoreError;

    fn try_from(row: UtxoRow) -> std::result::Result<Self, Self::Error> {
        Ok(Utxo {
            output_index: to_u32(row.output_index, "output_index")?,
            satoshis: to_u64(row.satoshis, "satoshis")?,
            created_at: text_to_ts(&row.created_at, "created_at")?,
            updated_at: text_to_ts(&row.updated_at, "updated_at")?,
            deleted_at: opt_ts(row.deleted_at.as_deref(), "deleted_at")?,
            transaction_id: row.transaction_id,
            xpub_id: row.xpub_id,
            script_pub_key: row.script_pub_key,
            draft_id: row.draft_id,
            spending_tx_id: row.spending_tx_id,
        })
    }
}

// --- SyncTransaction ---

impl From<&SyncTransaction> for SyncTransactionRow {
    fn from(s: &SyncTransaction) -> Self {
        SyncTransactionRow {
            id: s.id.clone(),
            broadcast_status: s.broadcast_status.as_str().to_string(),
            p2p_status: s.p2p_status.as_str().to_string(),
            sync_status: s.sync_status.as_str().to_string(),
            created_at: ts_to_text(&s.created_at),
            updated_at: ts_to_text(&s.updated_at),
        }
    }
}

impl TryFrom<SyncTransactionRow> for SyncTransaction {
    type Error = StoreError;

    fn try_from(row: SyncTransactionRow) -> std::result::Result<Self, Self::Error> {
        Ok(SyncTransaction {
            broadcast_status: sync_status(&row.broadcast_status)?,
            p2p_status: sync_status(&row.p2p_status)?,
            sync_status: sync_status(&row.sync_status)?,
            created_at: text_to_ts(&row.created_at, "created_at")?,
            updated_at: text_to_ts(&row.updated_at, "updated_at")?,
            id: row.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_as_text() {
        let early = text_to_ts("2026-01-01T09:00:00.5Z", "t").unwrap();
        let late = text_to_ts("2026-01-01T10:00:00Z", "t").unwrap();
        assert!(ts_to_text(&early) < ts_to_text(&late));
        assert_eq!(ts_to_text(&early).len(), ts_to_text(&late).len());
        assert_eq!(text_to_ts(&ts_to_text(&early), "t").unwrap(), early);
    }

    #[test]
    fn missing_status_is_stored_empty() {
        let tx = spvcore_sdk::testing::funding_tx(&[(spvcore_sdk::testing::p2pkh_script(1), 5)]);
        let record = Transaction::new(&tx);
        let row = TransactionRow::try_from(&record).unwrap();
        assert_eq!(row.tx_status, "");
        assert_eq!(Transaction::try_from(row).unwrap().status, None);
    }

    #[test]
    fn unknown_status_is_invalid_data() {
        let row = SyncTransactionRow {
            id: "ab".into(),
            broadcast_status: "ready".into(),
            p2p_status: "bogus".into(),
            sync_status: "ready".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(matches!(
            SyncTransaction::try_from(row),
            Err(StoreError::InvalidData(_))
        ));
    }
}
