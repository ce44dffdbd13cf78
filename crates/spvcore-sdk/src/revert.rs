//! Compensation: retracting a recorded transaction that never reached the network.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::chain::QueryOptions;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{
    DELETED_SPENDING_TX_ID, META_REVERT_BALANCE_APPLIED, META_XPUB_IN_IDS, META_XPUB_OUT_IDS,
    META_XPUB_OUTPUT_VALUE, REVERTED_SENTINEL, Transaction, TransactionStatus, TxInputRef,
};

impl Engine {
    /// Revert a transaction created from a draft, provided the network has
    /// not seen it and none of its outputs were spent since.
    pub async fn revert_transaction(&self, id: &str) -> Result<()> {
        let _guard = self.lock(&format!("outgoing-{id}")).await?;
        self.revert_unlocked(id).await
    }

    /// [`Engine::revert_transaction`] for callers already holding the
    /// transaction's recording lock.
    pub(crate) async fn revert_unlocked(&self, id: &str) -> Result<()> {
        let mut record = self.get_transaction(id)?;
        if record.is_reverted() {
            return Ok(());
        }

        // preconditions: nothing is modified until all of them hold
        if record.draft_id.is_empty() {
            return Err(Error::RevertNotFromDraft);
        }
        let draft = self
            .store
            .get_draft(&record.draft_id)
            .map_err(Error::Datastore)?
            .ok_or(Error::RevertDraftMissing)?;

        let opts = QueryOptions::in_mempool(self.config.revert_query_timeout);
        if self.query_chain(&record.id, opts).await?.is_some() {
            return Err(Error::RevertFoundOnChain);
        }

        let outputs = self
            .store
            .utxos_by_transaction(&record.id)
            .map_err(Error::Datastore)?;
        if let Some(spent) = outputs.iter().find(|u| u.is_spent_by_other(&record.id)) {
            return Err(Error::RevertOutputSpent {
                txid: spent.transaction_id.clone(),
                vout: spent.output_index,
                spending_tx_id: spent.spending_tx_id.clone().unwrap_or_default(),
            });
        }

        let now = Utc::now();

        // (a) retire the outputs
        for mut utxo in outputs {
            if utxo.spending_tx_id.as_deref() == Some(DELETED_SPENDING_TX_ID) {
                continue;
            }
            utxo.spending_tx_id = Some(DELETED_SPENDING_TX_ID.to_string());
            utxo.deleted_at = Some(now);
            utxo.updated_at = now;
            self.store.save_utxo(&utxo).map_err(Error::Datastore)?;
        }

        // (b) reverse balance deltas, once
        if !record.metadata.contains_key(META_REVERT_BALANCE_APPLIED) {
            let reversal: BTreeMap<String, i64> = record
                .xpub_output_value
                .iter()
                .map(|(owner, delta)| (owner.clone(), -delta))
                .collect();
            self.apply_balance_deltas(&reversal).await?;
            record
                .metadata
                .insert(META_REVERT_BALANCE_APPLIED.to_string(), serde_json::Value::Bool(true));
            self.persist_transaction(&mut record)?;
        }

        // (c) give the inputs back
        let mut inputs: Vec<TxInputRef> = draft.configuration.inputs.clone();
        for input in record.parsed()?.inputs {
            let input = TxInputRef {
                source_tx_id: input.source_txid,
                output_index: input.source_vout,
            };
            if !inputs.contains(&input) {
                inputs.push(input);
            }
        }
        for input in &inputs {
            let Some(mut utxo) = self
                .store
                .get_utxo(&input.source_tx_id, input.output_index)
                .map_err(Error::Datastore)?
            else {
                continue;
            };
            if utxo.spending_tx_id.as_deref() != Some(record.id.as_str()) {
                continue;
            }
            utxo.spending_tx_id = None;
            utxo.draft_id = None;
            utxo.updated_at = now;
            self.store.save_utxo(&utxo).map_err(Error::Datastore)?;
        }

        // (d) cancel the draft
        if let Err(e) = self.cancel_draft(&draft.id) {
            log::error!("revert: cannot cancel draft {} of {id}: {e}", draft.id);
        }

        // (e) cancel downstream processing
        if let Err(e) = self.update_sync_record(&record.id, |sync| sync.cancel_all()) {
            log::error!("revert: cannot cancel sync record of {id}: {e}");
        }

        // (f) keep the attribution for the record, then retire the transaction
        retire_attribution(&mut record)?;
        record.set_status(TransactionStatus::Reverted);
        record.deleted_at = Some(now);
        self.persist_transaction(&mut record)?;

        log::info!("revert: reverted {id}");
        Ok(())
    }
}

fn retire_attribution(record: &mut Transaction) -> Result<()> {
    let to_json = |v: serde_json::Result<serde_json::Value>| {
        v.map_err(|e| Error::Internal(format!("serializing attribution: {e}")))
    };
    let in_ids = to_json(serde_json::to_value(&record.xpub_in_ids))?;
    let out_ids = to_json(serde_json::to_value(&record.xpub_out_ids))?;
    let values = to_json(serde_json::to_value(&record.xpub_output_value))?;
    record.metadata.insert(META_XPUB_IN_IDS.to_string(), in_ids);
    record.metadata.insert(META_XPUB_OUT_IDS.to_string(), out_ids);
    record.metadata.insert(META_XPUB_OUTPUT_VALUE.to_string(), values);

    record.xpub_in_ids = vec![REVERTED_SENTINEL.to_string()];
    record.xpub_out_ids = vec![REVERTED_SENTINEL.to_string()];
    record.xpub_output_value = BTreeMap::from([(REVERTED_SENTINEL.to_string(), 0)]);
    Ok(())
}
