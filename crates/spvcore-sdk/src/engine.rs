use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chain::{
    Broadcaster, ChainError, ChainOracle, QueryOptions, TxInfo, TxStatus, UNKNOWN_CONFIRMATIONS,
    not_found_as_none,
};
use crate::datastore::Datastore;
use crate::error::{Error, Result};
use crate::lock::{LockGuard, Locker, MemoryLocker, acquire_wait_lock, xpub_lock_key};
use crate::merkle_path::MerklePath;
use crate::models::{
    Destination, DraftTransaction, FeeUnit, SyncStatus, SyncTransaction, Transaction,
    TransactionStatus, Xpub, xpub_id,
};
use crate::paymail::PaymailNotifier;
use crate::tokens::TokenVerifier;
use crate::tx::Tx;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a caller waits for a contended lock.
    pub lock_wait: Duration,
    /// Lifetime of a lock whose holder disappeared.
    pub lock_ttl: Duration,
    /// Deadline for a single chain service call.
    pub call_timeout: Duration,
    /// Deadline of the oracle check made before a revert.
    pub revert_query_timeout: Duration,
    /// How long a draft keeps its UTXOs reserved.
    pub draft_expiry: Duration,
    pub fee_unit: FeeUnit,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            revert_query_timeout: Duration::from_secs(30),
            draft_expiry: Duration::from_secs(20),
            fee_unit: FeeUnit::default(),
        }
    }
}

/// Body of a chain service status callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxCallback {
    #[serde(rename = "txid", alias = "txID")]
    pub tx_id: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub block_height: i64,
    pub tx_status: TxStatus,
    #[serde(default)]
    pub merkle_path: String,
}

/// The transaction lifecycle engine.
///
/// Owns the collaborators every operation needs. Drafting lives in
/// `draft.rs`, recording in `record/`, compensation in `revert.rs`.
pub struct Engine {
    pub(crate) store: Arc<dyn Datastore>,
    pub(crate) oracle: Arc<dyn ChainOracle>,
    pub(crate) broadcaster: Arc<dyn Broadcaster>,
    pub(crate) locker: Arc<dyn Locker>,
    pub(crate) notifier: Option<Arc<dyn PaymailNotifier>>,
    pub(crate) tokens: Option<Arc<dyn TokenVerifier>>,
    pub(crate) config: EngineConfig,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Datastore>,
        oracle: Arc<dyn ChainOracle>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            oracle,
            broadcaster,
            locker: Arc::new(MemoryLocker::new()),
            notifier: None,
            tokens: None,
            config: EngineConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = locker;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PaymailNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_token_verifier(mut self, tokens: Arc<dyn TokenVerifier>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancelling `token` interrupts every in-flight external call.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ---- external calls ----

    /// Race `fut` against shutdown and `timeout`.
    pub(crate) async fn run_guarded<F: Future>(
        &self,
        timeout: Duration,
        fut: F,
    ) -> std::result::Result<F::Output, String> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err("engine is shutting down".to_string()),
            res = tokio::time::timeout(timeout, fut) => {
                res.map_err(|_| format!("deadline of {timeout:?} exceeded"))
            }
        }
    }

    /// Query the oracle. `Ok(None)` means not found.
    pub async fn query_chain(
        &self,
        txid: &str,
        opts: QueryOptions,
    ) -> std::result::Result<Option<TxInfo>, ChainError> {
        let timeout = opts.timeout.unwrap_or(self.config.call_timeout);
        let result = self
            .run_guarded(timeout, self.oracle.query_transaction(txid, opts))
            .await
            .map_err(ChainError::Interrupted)?;
        not_found_as_none(result)
    }

    pub async fn broadcast(&self, tx: &Tx) -> std::result::Result<TxInfo, ChainError> {
        self.run_guarded(self.config.call_timeout, self.broadcaster.broadcast(tx))
            .await
            .map_err(ChainError::Interrupted)?
    }

    /// Broadcast a recorded transaction.
    pub(crate) async fn broadcast_record(&self, record: &Transaction) -> Result<TxInfo> {
        let tx = record.parsed()?;
        Ok(self.broadcast(&tx).await?)
    }

    pub(crate) async fn lock(&self, key: &str) -> Result<LockGuard> {
        acquire_wait_lock(&self.locker, key, self.config.lock_ttl, self.config.lock_wait).await
    }

    // ---- datastore helpers ----

    pub fn get_xpub(&self, xpub_id: &str) -> Result<Xpub> {
        self.store
            .get_xpub(xpub_id)
            .map_err(Error::Datastore)?
            .ok_or_else(|| Error::XpubNotFound(xpub_id.to_string()))
    }

    /// Register an owner, returning the existing record if already known.
    pub fn new_xpub(&self, raw_xpub: &str) -> Result<Xpub> {
        if raw_xpub.is_empty() {
            return Err(Error::EmptyXpubKey);
        }
        let id = xpub_id(raw_xpub);
        if let Some(existing) = self.store.get_xpub(&id).map_err(Error::Datastore)? {
            return Ok(existing);
        }
        let xpub = Xpub::new(raw_xpub);
        self.store.save_xpub(&xpub).map_err(Error::Datastore)?;
        log::info!("engine: registered xpub {id}");
        Ok(xpub)
    }

    /// Attribute outputs paying `locking_script` to the owner `xpub_id`.
    pub fn register_destination(&self, xpub_id: &str, locking_script: &str, address: &str) -> Result<Destination> {
        self.get_xpub(xpub_id)?;
        let mut destination = Destination::new(locking_script, xpub_id);
        destination.address = address.to_string();
        self.store
            .save_destination(&destination)
            .map_err(Error::Datastore)?;
        Ok(destination)
    }

    pub fn get_draft(&self, id: &str) -> Result<DraftTransaction> {
        self.store
            .get_draft(id)
            .map_err(Error::Datastore)?
            .ok_or_else(|| Error::DraftNotFound(id.to_string()))
    }

    pub fn get_transaction(&self, id: &str) -> Result<Transaction> {
        self.find_transaction(id)?
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))
    }

    pub(crate) fn find_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.store.get_transaction(id).map_err(Error::Datastore)
    }

    pub fn get_sync_transaction(&self, id: &str) -> Result<Option<SyncTransaction>> {
        self.store.get_sync_transaction(id).map_err(Error::Datastore)
    }

    /// Save a draft, refusing to change the configuration of a stored one.
    pub(crate) fn save_draft(&self, draft: &mut DraftTransaction) -> Result<()> {
        let existing = self.store.get_draft(&draft.id).map_err(Error::Datastore)?;
        if existing.is_some_and(|e| e.configuration != draft.configuration) {
            return Err(Error::DraftConfigurationImmutable(draft.id.clone()));
        }
        draft.updated_at = Utc::now();
        self.store.save_draft(draft).map_err(Error::Datastore)
    }

    /// Save a transaction record after checking its ID against its hex.
    pub(crate) fn persist_transaction(&self, record: &mut Transaction) -> Result<()> {
        let found = record.parsed()?.txid();
        if found != record.id {
            return Err(Error::TxIdMismatch {
                expected: record.id.clone(),
                found,
            });
        }
        record.updated_at = Utc::now();
        self.store
            .save_transaction(record)
            .map_err(Error::Datastore)
    }

    /// Load the sync record of `txid`, apply `update`, save if it changed.
    pub(crate) fn update_sync_record(
        &self,
        txid: &str,
        update: impl FnOnce(&mut SyncTransaction) -> bool,
    ) -> Result<()> {
        let Some(mut sync) = self
            .store
            .get_sync_transaction(txid)
            .map_err(Error::Datastore)?
        else {
            return Ok(());
        };
        if update(&mut sync) {
            sync.updated_at = Utc::now();
            self.store
                .save_sync_transaction(&sync)
                .map_err(Error::Datastore)?;
        }
        Ok(())
    }

    // ---- balances ----

    /// Add signed deltas to owner balances.
    ///
    /// Each owner is updated under its own lock, taken in key order and
    /// released before the next one, so this never nests owner locks.
    pub(crate) async fn apply_balance_deltas(&self, deltas: &BTreeMap<String, i64>) -> Result<()> {
        for (owner, delta) in deltas {
            if *delta == 0 {
                continue;
            }
            let _guard = self.lock(&xpub_lock_key(owner)).await?;
            let mut xpub = self.get_xpub(owner)?;
            let updated = i128::from(xpub.current_balance) + i128::from(*delta);
            xpub.current_balance =
                u64::try_from(updated).map_err(|_| Error::BalanceOverflow(owner.clone()))?;
            xpub.updated_at = Utc::now();
            self.store.save_xpub(&xpub).map_err(Error::Datastore)?;
        }
        Ok(())
    }

    /// Balance recomputed from the owner's unspent outputs.
    pub fn recalculate_balance(&self, xpub_id: &str) -> Result<u64> {
        let utxos = self.store.unspent_utxos(xpub_id).map_err(Error::Datastore)?;
        Ok(utxos
            .iter()
            .filter(|u| u.is_unspent())
            .map(|u| u.satoshis)
            .sum())
    }

    // ---- chain status ----

    /// Apply a chain service report to a record.
    ///
    /// Returns `Ok(false)` when the mapped status is unknown or unchanged.
    /// A mined report must carry a parseable merkle path and a valid block
    /// height; otherwise nothing is modified.
    pub(crate) fn apply_chain_info(&self, record: &mut Transaction, info: &TxInfo) -> Result<bool> {
        let Some(next) = info.tx_status.to_transaction_status() else {
            return Ok(false);
        };
        if record.status == Some(next) {
            return Ok(false);
        }
        if record.is_reverted() || record.deleted_at.is_some() {
            log::warn!(
                "engine: ignoring {} report for reverted transaction {}",
                info.tx_status,
                record.id
            );
            return Ok(false);
        }
        if record.status == Some(TransactionStatus::Mined) {
            log::warn!(
                "engine: ignoring late {} report for mined transaction {}",
                info.tx_status,
                record.id
            );
            return Ok(false);
        }
        if next == TransactionStatus::Mined {
            let bump = MerklePath::from_hex(&info.merkle_path)?;
            let height = u64::try_from(info.block_height)
                .map_err(|_| Error::InvalidBlockHeight(info.block_height))?;
            record.merkle_path = bump.to_hex();
            record.block_hash = info.block_hash.clone();
            record.block_height = height;
        }
        record.set_status(next);
        Ok(true)
    }

    /// Advance the sync record to match a record's new status.
    pub(crate) fn sync_record_for_status(&self, record: &Transaction) {
        let result = self.update_sync_record(&record.id, |sync| match record.status {
            Some(TransactionStatus::Broadcasted) => sync.advance_broadcast(SyncStatus::Complete),
            Some(TransactionStatus::Mined) => {
                let b = sync.advance_broadcast(SyncStatus::Complete);
                sync.advance_sync(SyncStatus::Complete) || b
            }
            _ => false,
        });
        if let Err(e) = result {
            log::error!("engine: cannot update sync record of {}: {e}", record.id);
        }
    }

    /// Ingest a status callback from the chain service.
    pub async fn update_transaction(&self, callback: &TxCallback) -> Result<Transaction> {
        // reject before touching anything
        MerklePath::from_hex(&callback.merkle_path)?;

        let info = TxInfo {
            txid: callback.tx_id.clone(),
            block_hash: callback.block_hash.clone(),
            block_height: callback.block_height,
            merkle_path: callback.merkle_path.clone(),
            tx_status: callback.tx_status,
            extra_info: String::new(),
            competing_txs: Vec::new(),
            confirmations: UNKNOWN_CONFIRMATIONS,
        };

        let mut record = self.get_transaction(&callback.tx_id)?;
        if !self.apply_chain_info(&mut record, &info)? {
            log::debug!(
                "engine: callback for {} did not change status ({})",
                record.id,
                callback.tx_status
            );
            return Ok(record);
        }
        self.persist_transaction(&mut record)?;
        self.sync_record_for_status(&record);
        log::info!(
            "engine: callback moved {} to {}",
            record.id,
            record.status.map(|s| s.as_str()).unwrap_or_default()
        );
        Ok(record)
    }
}
