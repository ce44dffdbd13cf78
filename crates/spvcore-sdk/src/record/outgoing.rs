use crate::chain::QueryOptions;
use crate::engine::Engine;
use crate::error::{CompensationOutcome, Error, Result};
use crate::models::{
    DraftTransaction, Metadata, SyncStatus, Transaction, TransactionStatus, xpub_id,
};
use crate::record::{ensure_sync_record, process_utxos};
use crate::tx::Tx;

/// A transaction signed by an owner from one of its drafts.
#[derive(Debug, Clone)]
pub struct OutgoingTx {
    pub tx: Option<Tx>,
    pub related_draft_id: String,
    pub xpub_key: String,
    pub metadata: Metadata,
}

impl OutgoingTx {
    pub fn validate(&self) -> Result<()> {
        if self.tx.is_none() {
            return Err(Error::MissingTransaction);
        }
        if self.related_draft_id.is_empty() {
            return Err(Error::EmptyRelatedDraftId);
        }
        if self.xpub_key.is_empty() {
            return Err(Error::EmptyXpubKey);
        }
        Ok(())
    }

    pub async fn execute(&self, engine: &Engine) -> Result<Transaction> {
        let tx = self.tx.as_ref().ok_or(Error::MissingTransaction)?;

        let (mut record, mut draft) = self
            .create_record(engine, tx)
            .map_err(|e| Error::CreateOutgoingTx(Box::new(e)))?;
        if record.is_reverted() {
            log::warn!("outgoing_tx: {} was reverted, not recording it again", record.id);
            return Ok(record);
        }

        process_utxos(engine, &mut record, tx).await?;
        engine.persist_transaction(&mut record)?;

        let policy = draft.configuration.effective_sync();
        let has_p2p = draft.configuration.has_p2p_outputs();
        if let Err(e) = ensure_sync_record(engine, &record.id, policy, has_p2p) {
            log::error!("outgoing_tx: cannot create sync record for {}: {e}", record.id);
        }
        if let Err(e) = engine.complete_draft(&mut draft, &record.id) {
            log::error!("outgoing_tx: cannot complete draft {}: {e}", draft.id);
        }

        let notified = engine
            .get_sync_transaction(&record.id)
            .ok()
            .flatten()
            .is_some_and(|s| s.p2p_status == SyncStatus::Complete);
        if policy.paymail_p2p && has_p2p && !notified {
            if let Err(cause) = notify_p2p(engine, &draft, tx).await {
                return Err(handle_p2p_error(engine, &record, cause).await);
            }
            if let Err(e) = engine.update_sync_record(&record.id, |s| s.advance_p2p(SyncStatus::Complete)) {
                log::error!("outgoing_tx: cannot update sync record of {}: {e}", record.id);
            }
        }

        // the recipient may have broadcast it through the internal incoming path
        let mut record = engine
            .get_transaction(&record.id)
            .map_err(|e| Error::Internal(format!("re-reading {}: {e}", record.id)))?;
        if matches!(
            record.status,
            Some(TransactionStatus::Broadcasted | TransactionStatus::Mined)
        ) {
            return Ok(record);
        }

        if tx.is_token_transfer() {
            log::info!("outgoing_tx: token transfer found in {}", record.id);
            verify_token_transfer(engine, tx).await?;
            log::info!("outgoing_tx: token transfer {} verified", record.id);
        }

        if policy.broadcast && policy.broadcast_instant {
            match engine.broadcast(tx).await {
                Ok(info) => {
                    log::debug!("outgoing_tx: broadcast {} -> {}", record.id, info.tx_status);
                    record.set_status(TransactionStatus::Broadcasted);
                    engine.sync_record_for_status(&record);
                }
                // the recipient most likely broadcast it already
                Err(e) => log::warn!("outgoing_tx: broadcasting {} failed: {e}", record.id),
            }
        }

        if let Err(e) = engine.persist_transaction(&mut record) {
            log::error!(
                "outgoing_tx: {} processed but the final save failed: {e}",
                record.id
            );
        }
        Ok(record)
    }

    fn create_record(&self, engine: &Engine, tx: &Tx) -> Result<(Transaction, DraftTransaction)> {
        let owner = xpub_id(&self.xpub_key);
        let draft = engine.get_draft(&self.related_draft_id)?;
        // another owner's draft is as good as missing
        if draft.xpub_id != owner {
            log::warn!(
                "outgoing_tx: draft {} does not belong to xpub {owner}",
                draft.id
            );
            return Err(Error::DraftNotFound(draft.id));
        }
        if draft.configuration.outputs.is_empty() {
            return Err(Error::DraftHasNoOutputs);
        }

        // recording again must not reset the status of a stored record
        let mut record = match engine.find_transaction(&tx.txid())? {
            Some(existing) => existing,
            None => {
                let mut record = Transaction::new(tx);
                record.status = Some(TransactionStatus::Created);
                record
            }
        };
        record.xpub_id = owner;
        record.draft_id = draft.id.clone();
        record.metadata.extend(draft.metadata.clone());
        record.metadata.extend(self.metadata.clone());
        Ok((record, draft))
    }
}

/// Notify every P2P recipient of the draft.
async fn notify_p2p(engine: &Engine, draft: &DraftTransaction, tx: &Tx) -> std::result::Result<(), String> {
    let notifier = engine
        .notifier
        .as_ref()
        .ok_or_else(|| Error::NotifierNotConfigured.to_string())?;
    for output in draft.configuration.outputs.iter().filter(|o| o.is_p2p()) {
        let Some(p4) = output.paymail_p4.as_ref() else {
            continue;
        };
        let address = p4.address();
        engine
            .run_guarded(
                engine.config.call_timeout,
                notifier.notify(&address, p4, &p4.reference_id, tx),
            )
            .await??;
        log::info!("outgoing_tx: notified {address} about {}", tx.txid());
    }
    Ok(())
}

/// Decide what to do with a persisted transaction whose recipient was not
/// told about it. Reverts it when the network has not seen it; otherwise,
/// or when that cannot be established, marks it problematic.
async fn handle_p2p_error(engine: &Engine, record: &Transaction, cause: String) -> Error {
    log::warn!("outgoing_tx: P2P notification for {} failed: {cause}", record.id);

    let outcome = match engine.query_chain(&record.id, QueryOptions::default()).await {
        Err(e) => {
            log::error!("outgoing_tx: cannot check {} on chain: {e}", record.id);
            CompensationOutcome::MarkedProblematic
        }
        Ok(Some(_)) => {
            log::warn!("outgoing_tx: {} already known on chain, not reverting", record.id);
            CompensationOutcome::MarkedProblematic
        }
        Ok(None) => match engine.revert_unlocked(&record.id).await {
            Ok(()) => CompensationOutcome::Reverted,
            Err(e) => {
                log::error!("outgoing_tx: revert of {} failed: {e}", record.id);
                CompensationOutcome::MarkedProblematic
            }
        },
    };

    if outcome == CompensationOutcome::MarkedProblematic {
        mark_problematic(engine, record);
    }
    Error::P2pNotification { cause, outcome }
}

fn mark_problematic(engine: &Engine, record: &Transaction) {
    // a failed revert may have checkpointed progress on the stored copy
    let mut current = match engine.find_transaction(&record.id) {
        Ok(Some(stored)) => stored,
        _ => record.clone(),
    };
    current.set_status(TransactionStatus::Problematic);
    if let Err(e) = engine.persist_transaction(&mut current) {
        log::error!(
            "outgoing_tx: cannot save {} as problematic after P2P failure: {e}",
            record.id
        );
    }
}

async fn verify_token_transfer(engine: &Engine, tx: &Tx) -> Result<()> {
    let verifier = engine
        .tokens
        .as_ref()
        .ok_or_else(|| Error::TokenValidation("token verifier is not configured".into()))?;
    let hex = tx.to_ef_hex().unwrap_or_else(|_| tx.to_hex());
    engine
        .run_guarded(
            engine.config.call_timeout,
            verifier.verify_and_save_token_transfer(&hex),
        )
        .await
        .and_then(|r| r)
        .map_err(Error::TokenValidation)
}
