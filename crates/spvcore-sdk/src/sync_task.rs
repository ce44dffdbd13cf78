//! Periodic reconciliation of unfinished transactions against the chain service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, QueryOptions, TxInfo};
use crate::engine::Engine;
use crate::error::Error;
use crate::models::{Transaction, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTaskConfig {
    /// Whether the chain service calls back with status updates.
    pub callback_enabled: bool,
    /// With callbacks on, a broadcast transaction is left alone this long.
    pub callback_grace: Duration,
    /// Time after which a transaction could be mined; also the broadcast
    /// grace when callbacks are off.
    pub mine_grace: Duration,
    /// Records not updated for this long become problematic when the chain
    /// service cannot vouch for them.
    pub problematic_after: Duration,
}

impl Default for SyncTaskConfig {
    fn default() -> Self {
        Self {
            callback_enabled: false,
            callback_grace: Duration::from_secs(60 * 60),
            mine_grace: Duration::from_secs(10 * 60),
            problematic_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub candidates: usize,
    pub mined: usize,
    pub broadcasted: usize,
    pub problematic: usize,
    /// Checked with no status change.
    pub unchanged: usize,
    /// Left for a later cycle after an error.
    pub skipped: usize,
    /// The sweep stopped early because the chain service was unavailable.
    pub aborted: bool,
}

impl SyncReport {
    fn count(&mut self, status: Option<TransactionStatus>) {
        match status {
            Some(TransactionStatus::Mined) => self.mined += 1,
            Some(TransactionStatus::Broadcasted) => self.broadcasted += 1,
            Some(TransactionStatus::Problematic) => self.problematic += 1,
            _ => {}
        }
    }
}

enum Step {
    Changed,
    Unchanged,
    Skipped,
    Abort,
}

pub struct SyncTask {
    engine: Arc<Engine>,
    config: SyncTaskConfig,
}

fn before(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl SyncTask {
    pub fn new(engine: Arc<Engine>, config: SyncTaskConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &SyncTaskConfig {
        &self.config
    }

    /// Sweep until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("sync_task: started, interval {interval:?}");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("sync_task: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.candidates > 0 {
                        log::info!("sync_task: {report:?}");
                    }
                }
            }
        }
    }

    /// One sweep over every candidate, oldest first. Never fails; problems
    /// are logged and the record is left for the next cycle.
    pub async fn run_once(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let now = Utc::now();
        let broadcast_grace = if self.config.callback_enabled {
            self.config.callback_grace
        } else {
            self.config.mine_grace
        };

        let ids = match self.engine.store.transactions_to_sync(
            before(now, broadcast_grace),
            before(now, self.config.mine_grace),
        ) {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("sync_task: cannot fetch transactions to sync: {e}");
                return report;
            }
        };
        report.candidates = ids.len();
        log::debug!("sync_task: {} transactions to sync", ids.len());

        let stale_before = before(now, self.config.problematic_after);
        for id in ids {
            let mut record = match self.engine.find_transaction(&id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    log::error!("sync_task: transaction {id} disappeared");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::error!("sync_task: cannot load {id}: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.sync_one(&mut record, stale_before).await {
                Step::Changed => {
                    self.save(&mut record);
                    report.count(record.status);
                }
                Step::Unchanged => report.unchanged += 1,
                Step::Skipped => report.skipped += 1,
                Step::Abort => {
                    report.aborted = true;
                    break;
                }
            }
        }
        report
    }

    async fn sync_one(&self, record: &mut Transaction, stale_before: DateTime<Utc>) -> Step {
        let stale = record.updated_at < stale_before;
        match self.engine.query_chain(&record.id, QueryOptions::default()).await {
            Err(e @ (ChainError::Unreachable(_) | ChainError::Interrupted(_))) => {
                // pointless to query the rest; try again next cycle
                log::warn!("sync_task: {e}, stopping sweep");
                Step::Abort
            }
            Err(e) => {
                log::error!("sync_task: cannot query {}: {e}", record.id);
                if stale && record.set_status(TransactionStatus::Problematic) {
                    Step::Changed
                } else {
                    Step::Skipped
                }
            }
            Ok(None) => self.handle_unknown(record, stale).await,
            Ok(Some(info)) => self.handle_found(record, &info),
        }
    }

    async fn handle_unknown(&self, record: &mut Transaction, stale: bool) -> Step {
        if stale {
            return if record.set_status(TransactionStatus::Problematic) {
                Step::Changed
            } else {
                Step::Unchanged
            };
        }
        if record.status != Some(TransactionStatus::Created) {
            // queried again next time until it is old enough to give up on
            return Step::Unchanged;
        }
        match self.engine.broadcast_record(record).await {
            Ok(_) => {
                record.set_status(TransactionStatus::Broadcasted);
                Step::Changed
            }
            Err(Error::Chain(ChainError::ProblematicStatus(reason))) => {
                log::warn!("sync_task: rebroadcast of {} is problematic: {reason}", record.id);
                record.set_status(TransactionStatus::Problematic);
                Step::Changed
            }
            Err(e) => {
                log::warn!("sync_task: rebroadcast of {} failed: {e}", record.id);
                Step::Skipped
            }
        }
    }

    fn handle_found(&self, record: &mut Transaction, info: &TxInfo) -> Step {
        match self.engine.apply_chain_info(record, info) {
            Ok(true) => {
                if record.status == Some(TransactionStatus::Mined) {
                    log::info!(
                        "sync_task: {} mined in block {} at height {}",
                        record.id,
                        record.block_hash,
                        record.block_height
                    );
                }
                Step::Changed
            }
            Ok(false) => {
                log::warn!(
                    "sync_task: {} has not changed its status yet ({})",
                    record.id,
                    info.tx_status
                );
                Step::Unchanged
            }
            Err(Error::InvalidMerklePath(reason)) => {
                log::warn!(
                    "sync_task: {} reported mined without a usable merkle path: {reason}",
                    record.id
                );
                Step::Skipped
            }
            Err(e) => {
                log::error!("sync_task: cannot apply chain status to {}: {e}", record.id);
                Step::Skipped
            }
        }
    }

    fn save(&self, record: &mut Transaction) {
        if let Err(e) = self.engine.persist_transaction(record) {
            log::error!("sync_task: cannot update {}: {e}", record.id);
            return;
        }
        self.engine.sync_record_for_status(record);
    }
}
