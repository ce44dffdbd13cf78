use chrono::{DateTime, Utc};

use crate::models::{Destination, DraftTransaction, SyncTransaction, Transaction, Utxo, Xpub};

/// Persistence operations needed by the engine.
///
/// Each call is an atomic single-record write or read; nothing spans
/// multiple records. `spvcore-store` implements this for SQLite and
/// `testing::MemoryStore` keeps everything in memory. Saves are upserts.
pub trait Datastore: Send + Sync {
    fn get_xpub(&self, id: &str) -> Result<Option<Xpub>, String>;
    fn save_xpub(&self, xpub: &Xpub) -> Result<(), String>;

    fn get_destination(&self, locking_script: &str) -> Result<Option<Destination>, String>;
    fn save_destination(&self, destination: &Destination) -> Result<(), String>;

    fn get_draft(&self, id: &str) -> Result<Option<DraftTransaction>, String>;
    fn save_draft(&self, draft: &DraftTransaction) -> Result<(), String>;

    /// Includes soft-deleted transactions.
    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, String>;
    fn save_transaction(&self, tx: &Transaction) -> Result<(), String>;

    /// IDs of transactions the reconciliation sweep should look at, oldest first:
    /// `broadcasted` created before `broadcasted_before`, `created` created before
    /// `created_before`, and records without a status. Soft-deleted rows are excluded.
    fn transactions_to_sync(
        &self,
        broadcasted_before: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<String>, String>;

    fn get_utxo(&self, transaction_id: &str, output_index: u32) -> Result<Option<Utxo>, String>;
    fn save_utxo(&self, utxo: &Utxo) -> Result<(), String>;
    /// All outputs created by `transaction_id`, including deleted ones.
    fn utxos_by_transaction(&self, transaction_id: &str) -> Result<Vec<Utxo>, String>;
    /// Unspent, non-deleted outputs of an owner.
    fn unspent_utxos(&self, xpub_id: &str) -> Result<Vec<Utxo>, String>;

    fn get_sync_transaction(&self, id: &str) -> Result<Option<SyncTransaction>, String>;
    fn save_sync_transaction(&self, sync: &SyncTransaction) -> Result<(), String>;
}
