use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use spvcore_sdk::Datastore;
use spvcore_sdk::models::{
    Destination, DraftTransaction, SyncTransaction, Transaction, TransactionStatus, Utxo, Xpub,
};

use crate::conversions::ts_to_text;
use crate::error::StoreError;
use crate::models::{DestinationRow, DraftRow, SyncTransactionRow, TransactionRow, UtxoRow, XpubRow};
use crate::schema::{destinations, draft_transactions, sync_transactions, transactions, utxos, xpubs};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQLite-backed [`Datastore`].
///
/// Every save is a single-row `REPLACE`, so each write is atomic on its own
/// and nothing spans rows. The connection sits behind a mutex because
/// Diesel's `SqliteConnection` needs `&mut` even for reads.
pub struct SqliteDatastore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteDatastore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        Self::establish(path)
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::establish(":memory:")
    }

    fn establish(url: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(url)?;
        conn.batch_execute("PRAGMA busy_timeout = 5000;")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(SqliteDatastore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> crate::Result<MutexGuard<'_, SqliteConnection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ==================== Owners ====================

    pub fn load_xpub(&self, id: &str) -> crate::Result<Option<Xpub>> {
        let row = xpubs::table
            .find(id)
            .select(XpubRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(Xpub::try_from).transpose()
    }

    pub fn store_xpub(&self, xpub: &Xpub) -> crate::Result<()> {
        let row = XpubRow::try_from(xpub)?;
        diesel::replace_into(xpubs::table)
            .values(&row)
            .execute(&mut *self.conn()?)?;
        Ok(())
    }

    pub fn load_destination(&self, locking_script: &str) -> crate::Result<Option<Destination>> {
        let row = destinations::table
            .find(locking_script)
            .select(DestinationRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(Destination::try_from).transpose()
    }

    pub fn store_destination(&self, destination: &Destination) -> crate::Result<()> {
        diesel::replace_into(destinations::table)
            .values(&DestinationRow::from(destination))
            .execute(&mut *self.conn()?)?;
        Ok(())
    }

    // ==================== Drafts ====================

    pub fn load_draft(&self, id: &str) -> crate::Result<Option<DraftTransaction>> {
        let row = draft_transactions::table
            .find(id)
            .select(DraftRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(DraftTransaction::try_from).transpose()
    }

    pub fn store_draft(&self, draft: &DraftTransaction) -> crate::Result<()> {
        let row = DraftRow::try_from(draft)?;
        diesel::replace_into(draft_transactions::table)
            .values(&row)
            .execute(&mut *self.conn()?)?;
        Ok(())
    }

    // ==================== Transactions ====================

    /// Soft-deleted records included.
    pub fn load_transaction(&self, id: &str) -> crate::Result<Option<Transaction>> {
        let row = transactions::table
            .find(id)
            .select(TransactionRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(Transaction::try_from).transpose()
    }

    pub fn store_transaction(&self, tx: &Transaction) -> crate::Result<()> {
        let row = TransactionRow::try_from(tx)?;
        diesel::replace_into(transactions::table)
            .values(&row)
            .execute(&mut *self.conn()?)?;
        Ok(())
    }

    /// IDs of live records due for reconciliation, oldest first: broadcast
    /// ones created before `broadcasted_before`, created ones before
    /// `created_before`, and every record without a status.
    pub fn load_transactions_to_sync(
        &self,
        broadcasted_before: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> crate::Result<Vec<String>> {
        let broadcasted = TransactionStatus::Broadcasted.as_str();
        let created = TransactionStatus::Created.as_str();
        let ids = transactions::table
            .filter(transactions::deleted_at.is_null())
            .filter(
                transactions::tx_status
                    .eq(broadcasted)
                    .and(transactions::created_at.lt(ts_to_text(&broadcasted_before)))
                    .or(transactions::tx_status
                        .eq(created)
                        .and(transactions::created_at.lt(ts_to_text(&created_before))))
                    .or(transactions::tx_status.eq("")),
            )
            .order((transactions::created_at.asc(), transactions::id.asc()))
            .select(transactions::id)
            .load::<String>(&mut *self.conn()?)?;
        Ok(ids)
    }

    // ==================== UTXOs ====================

    pub fn load_utxo(&self, transaction_id: &str, output_index: u32) -> crate::Result<Option<Utxo>> {
        let index = i32::try_from(output_index)
            .map_err(|_| StoreError::InvalidData(format!("output index {output_index} out of range")))?;
        let row = utxos::table
            .find((transaction_id, index))
            .select(UtxoRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(Utxo::try_from).transpose()
    }

    pub fn store_utxo(&self, utxo: &Utxo) -> crate::Result<()> {
        let row = UtxoRow::try_from(utxo)?;
        diesel::replace_into(utxos::table)
            .values(&row)
            .execute(&mut *self.conn()?)?;
        Ok(())
    }

    pub fn load_utxos_by_transaction(&self, transaction_id: &str) -> crate::Result<Vec<Utxo>> {
        let rows = utxos::table
            .filter(utxos::transaction_id.eq(transaction_id))
            .order(utxos::output_index.asc())
            .select(UtxoRow::as_select())
            .load(&mut *self.conn()?)?;
        rows.into_iter().map(Utxo::try_from).collect()
    }

    pub fn load_unspent_utxos(&self, xpub_id: &str) -> crate::Result<Vec<Utxo>> {
        let rows = utxos::table
            .filter(utxos::xpub_id.eq(xpub_id))
            .filter(utxos::spending_tx_id.is_null())
            .filter(utxos::deleted_at.is_null())
            .order((utxos::transaction_id.asc(), utxos::output_index.asc()))
            .select(UtxoRow::as_select())
            .load(&mut *self.conn()?)?;
        rows.into_iter().map(Utxo::try_from).collect()
    }

    // ==================== Sync records ====================

    pub fn load_sync_transaction(&self, id: &str) -> crate::Result<Option<SyncTransaction>> {
        let row = sync_transactions::table
            .find(id)
            .select(SyncTransactionRow::as_select())
            .first(&mut *self.conn()?)
            .optional()?;
        row.map(SyncTransaction::try_from).transpose()
    }

    pub fn store_sync_transaction(&self, sync: &SyncTransaction) -> crate::Result<()> {
        diesel::replace_into(sync_transactions::table)
            .values(&SyncTransactionRow::from(sync))
            .execute(&mut *self.conn()?)?;
        Ok(())
    }
}

fn to_string_err<T>(res: crate::Result<T>) -> std::result::Result<T, String> {
    res.map_err(|e| e.to_string())
}

impl Datastore for SqliteDatastore {
    fn get_xpub(&self, id: &str) -> Result<Option<Xpub>, String> {
        to_string_err(self.load_xpub(id))
    }

    fn save_xpub(&self, xpub: &Xpub) -> Result<(), String> {
        to_string_err(self.store_xpub(xpub))
    }

    fn get_destination(&self, locking_script: &str) -> Result<Option<Destination>, String> {
        to_string_err(self.load_destination(locking_script))
    }

    fn save_destination(&self, destination: &Destination) -> Result<(), String> {
        to_string_err(self.store_destination(destination))
    }

    fn get_draft(&self, id: &str) -> Result<Option<DraftTransaction>, String> {
        to_string_err(self.load_draft(id))
    }

    fn save_draft(&self, draft: &DraftTransaction) -> Result<(), String> {
        to_string_err(self.store_draft(draft))
    }

    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, String> {
        to_string_err(self.load_transaction(id))
    }

    fn save_transaction(&self, tx: &Transaction) -> Result<(), String> {
        to_string_err(self.store_transaction(tx))
    }

    fn transactions_to_sync(
        &self,
        broadcasted_before: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<String>, String> {
        to_string_err(self.load_transactions_to_sync(broadcasted_before, created_before))
    }

    fn get_utxo(&self, transaction_id: &str, output_index: u32) -> Result<Option<Utxo>, String> {
        to_string_err(self.load_utxo(transaction_id, output_index))
    }

    fn save_utxo(&self, utxo: &Utxo) -> Result<(), String> {
        to_string_err(self.store_utxo(utxo))
    }

    fn utxos_by_transaction(&self, transaction_id: &str) -> Result<Vec<Utxo>, String> {
        to_string_err(self.load_utxos_by_transaction(transaction_id))
    }

    fn unspent_utxos(&self, xpub_id: &str) -> Result<Vec<Utxo>, String> {
        to_string_err(self.load_unspent_utxos(xpub_id))
    }

    fn get_sync_transaction(&self, id: &str) -> Result<Option<SyncTransaction>, String> {
        to_string_err(self.load_sync_transaction(id))
    }

    fn save_sync_transaction(&self, sync: &SyncTransaction) -> Result<(), String> {
        to_string_err(self.store_sync_transaction(sync))
    }
}
