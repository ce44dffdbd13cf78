//! Recording strategies: the ways a transaction enters the ledger.

mod internal_incoming;
mod outgoing;
mod raw_incoming;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

pub use internal_incoming::InternalIncomingTx;
pub use outgoing::OutgoingTx;
pub use raw_incoming::RawIncomingTx;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Metadata, SyncConfig, SyncTransaction, Transaction, Utxo};
use crate::tx::Tx;

/// One way of recording a transaction.
#[derive(Debug, Clone)]
pub enum RecordStrategy {
    Outgoing(OutgoingTx),
    RawIncoming(RawIncomingTx),
    InternalIncoming(InternalIncomingTx),
}

impl RecordStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Outgoing(_) => "outgoing_tx",
            Self::RawIncoming(_) => "raw_incoming_tx",
            Self::InternalIncoming(_) => "internal_incoming_tx",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Outgoing(s) => s.validate(),
            Self::RawIncoming(s) => s.validate(),
            Self::InternalIncoming(s) => s.validate(),
        }
    }

    /// Empty when no transaction was supplied.
    pub fn tx_id(&self) -> String {
        let tx = match self {
            Self::Outgoing(s) => s.tx.as_ref(),
            Self::RawIncoming(s) => s.tx.as_ref(),
            Self::InternalIncoming(s) => s.tx.as_ref(),
        };
        tx.map(Tx::txid).unwrap_or_default()
    }

    pub fn lock_key(&self) -> String {
        let prefix = match self {
            Self::Outgoing(_) => "outgoing",
            Self::RawIncoming(_) => "incoming",
            Self::InternalIncoming(_) => "internal-incoming",
        };
        format!("{prefix}-{}", self.tx_id())
    }

    pub async fn execute(&self, engine: &Engine) -> Result<Transaction> {
        match self {
            Self::Outgoing(s) => s.execute(engine).await,
            Self::RawIncoming(s) => s.execute(engine).await,
            Self::InternalIncoming(s) => s.execute(engine).await,
        }
    }
}

impl Engine {
    /// Validate, lock on the strategy's key, execute.
    pub async fn record(&self, strategy: RecordStrategy) -> Result<Transaction> {
        strategy.validate()?;
        let _guard = self.lock(&strategy.lock_key()).await?;
        log::debug!("{}: recording {}", strategy.name(), strategy.tx_id());
        strategy.execute(self).await
    }

    /// Record a signed transaction negotiated through draft `draft_id`.
    pub async fn record_transaction(
        &self,
        raw_xpub: &str,
        tx_hex: &str,
        draft_id: &str,
        metadata: Metadata,
    ) -> Result<Transaction> {
        let tx = Tx::from_hex(tx_hex)?;
        self.record(RecordStrategy::Outgoing(OutgoingTx {
            tx: Some(tx),
            related_draft_id: draft_id.to_string(),
            xpub_key: raw_xpub.to_string(),
            metadata,
        }))
        .await
    }

    /// Record a transaction without a draft. No checks and no broadcast;
    /// the reconciliation sweep picks it up later.
    pub async fn record_raw_transaction(&self, tx_hex: &str, metadata: Metadata) -> Result<Transaction> {
        let tx = Tx::from_hex(tx_hex)?;
        self.record(RecordStrategy::RawIncoming(RawIncomingTx {
            tx: Some(tx),
            metadata,
        }))
        .await
    }

    /// Receive side of a P2P payment between owners of this ledger.
    pub async fn record_internal_incoming(&self, tx_hex: &str) -> Result<Transaction> {
        let tx = Tx::from_hex(tx_hex)?;
        self.record(RecordStrategy::InternalIncoming(InternalIncomingTx { tx: Some(tx) }))
            .await
    }
}

/// Spend the owned inputs of `tx`, register its owned outputs, and apply
/// the balance changes.
///
/// Safe to repeat: inputs already spent by this transaction and outputs
/// already registered are not counted again. `xpub_output_value` always
/// holds the full per-owner deltas.
pub(crate) async fn process_utxos(engine: &Engine, record: &mut Transaction, tx: &Tx) -> Result<()> {
    let txid = record.id.clone();
    let now = Utc::now();

    let mut full: BTreeMap<String, i64> = BTreeMap::new();
    let mut pending: BTreeMap<String, i64> = BTreeMap::new();
    let mut in_owners = BTreeSet::new();
    let mut out_owners = BTreeSet::new();
    let mut inputs_total = Some(0u64);

    let mut to_spend = Vec::new();
    for input in &tx.inputs {
        let Some(utxo) = engine
            .store
            .get_utxo(&input.source_txid, input.source_vout)
            .map_err(Error::Datastore)?
        else {
            inputs_total = inputs_total
                .zip(input.source_output.as_ref())
                .map(|(t, o)| t + o.satoshis);
            continue;
        };
        inputs_total = inputs_total.map(|t| t + utxo.satoshis);
        let value = signed(utxo.satoshis)?;
        *full.entry(utxo.xpub_id.clone()).or_default() -= value;
        in_owners.insert(utxo.xpub_id.clone());
        let spender = utxo.spending_tx_id.clone();
        match spender.as_deref() {
            Some(s) if s == txid => {}
            Some(s) => {
                return Err(Error::UtxoAlreadySpent {
                    spending_tx_id: s.to_string(),
                    txid: utxo.transaction_id,
                    vout: utxo.output_index,
                });
            }
            None => {
                *pending.entry(utxo.xpub_id.clone()).or_default() -= value;
                to_spend.push(utxo);
            }
        }
    }

    let mut to_create = Vec::new();
    for (vout, output) in tx.outputs.iter().enumerate() {
        let script = output.locking_script_hex();
        let Some(destination) = engine
            .store
            .get_destination(&script)
            .map_err(Error::Datastore)?
        else {
            continue;
        };
        let vout = vout as u32;
        let value = signed(output.satoshis)?;
        *full.entry(destination.xpub_id.clone()).or_default() += value;
        out_owners.insert(destination.xpub_id.clone());
        if engine
            .store
            .get_utxo(&txid, vout)
            .map_err(Error::Datastore)?
            .is_none()
        {
            *pending.entry(destination.xpub_id.clone()).or_default() += value;
            to_create.push(Utxo::new(
                txid.clone(),
                vout,
                destination.xpub_id,
                output.satoshis,
                script,
            ));
        }
    }

    for mut utxo in to_spend {
        utxo.spending_tx_id = Some(txid.clone());
        utxo.updated_at = now;
        engine.store.save_utxo(&utxo).map_err(Error::Datastore)?;
    }
    for utxo in &to_create {
        engine.store.save_utxo(utxo).map_err(Error::Datastore)?;
    }
    engine.apply_balance_deltas(&pending).await?;

    let outputs_total = tx.total_output_satoshis();
    record.xpub_in_ids = in_owners.into_iter().collect();
    record.xpub_out_ids = out_owners.into_iter().collect();
    record.xpub_output_value = full;
    record.total_value = outputs_total;
    record.fee = inputs_total
        .map(|t| t.saturating_sub(outputs_total))
        .unwrap_or(0);
    Ok(())
}

fn signed(satoshis: u64) -> Result<i64> {
    i64::try_from(satoshis).map_err(|_| Error::Internal(format!("{satoshis} satoshis out of range")))
}

/// Create the sync record of a freshly persisted transaction. An existing
/// record is left alone.
pub(crate) fn ensure_sync_record(engine: &Engine, txid: &str, policy: SyncConfig, has_p2p: bool) -> Result<()> {
    if engine
        .store
        .get_sync_transaction(txid)
        .map_err(Error::Datastore)?
        .is_some()
    {
        return Ok(());
    }
    engine
        .store
        .save_sync_transaction(&SyncTransaction::new(txid, policy, has_p2p))
        .map_err(Error::Datastore)
}
