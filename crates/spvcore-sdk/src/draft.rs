//! Draft negotiation: turns an owner's payment request into a spending plan.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::lock::xpub_lock_key;
use crate::models::{
    DraftStatus, DraftTransaction, FeeUnit, Metadata, TransactionConfig, TxInputRef, Utxo, xpub_id,
};
use crate::tx::{Tx, TxInput, TxOutput};

const BASE_TX_SIZE: u64 = 10;
const P2PKH_INPUT_SIZE: u64 = 148;
const P2PKH_OUTPUT_SIZE: u64 = 34;

fn estimate_size(inputs: usize, outputs: usize) -> u64 {
    BASE_TX_SIZE + P2PKH_INPUT_SIZE * inputs as u64 + P2PKH_OUTPUT_SIZE * outputs as u64
}

/// Fee and change for spending `total` to `needed` across `outputs` outputs,
/// or `None` if `total` does not cover it. Excess too small to pay for a
/// change output goes to the fee.
fn settle(unit: &FeeUnit, total: u64, needed: u64, inputs: usize, outputs: usize) -> Option<(u64, u64)> {
    let fee = unit.fee_for(estimate_size(inputs, outputs));
    let excess = total.checked_sub(needed)?.checked_sub(fee)?;
    if excess == 0 {
        return Some((fee, 0));
    }
    let fee_with_change = unit.fee_for(estimate_size(inputs, outputs + 1));
    match total - needed {
        spare if spare > fee_with_change => Some((fee_with_change, spare - fee_with_change)),
        spare => Some((spare, 0)),
    }
}

fn validate_outputs(config: &TransactionConfig) -> Result<()> {
    if config.outputs.is_empty() {
        return Err(Error::EmptyOutputs);
    }
    for (i, output) in config.outputs.iter().enumerate() {
        if output.locking_script.is_empty() {
            return Err(Error::MissingLockingScript(i));
        }
        hex::decode(&output.locking_script)
            .map_err(|e| Error::InvalidHex(format!("output {i} locking script: {e}")))?;
        if output.satoshis == 0 {
            return Err(Error::ZeroOutputValue(i));
        }
    }
    Ok(())
}

fn new_draft_id() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

struct SpendingPlan {
    utxos: Vec<Utxo>,
    fee: u64,
    change: u64,
}

impl Engine {
    /// Build and persist a draft for the owner of `raw_xpub`.
    ///
    /// Runs under the owner's lock. Selected UTXOs are reserved before the
    /// draft is saved; if the save fails the reservations are released.
    pub async fn new_draft(
        &self,
        raw_xpub: &str,
        config: TransactionConfig,
        metadata: Metadata,
    ) -> Result<DraftTransaction> {
        if raw_xpub.is_empty() {
            return Err(Error::EmptyXpubKey);
        }
        validate_outputs(&config)?;

        let owner = xpub_id(raw_xpub);
        let _guard = self.lock(&xpub_lock_key(&owner)).await?;
        self.get_xpub(&owner)?;

        let now = Utc::now();
        let mut config = config;
        let unit = config.fee_unit.unwrap_or(self.config.fee_unit);
        config.fee_unit = Some(unit);

        let plan = self.plan_spending(&owner, &config, &unit, now)?;
        if plan.change > 0 {
            self.check_change_destination(&owner, config.change_destination.as_deref())?;
        }
        config.inputs = plan
            .utxos
            .iter()
            .map(|u| TxInputRef {
                source_tx_id: u.transaction_id.clone(),
                output_index: u.output_index,
            })
            .collect();
        config.fee = plan.fee;
        config.change_satoshis = plan.change;

        let unsigned = unsigned_tx(&config, &plan.utxos)?;
        let expiry = chrono::Duration::from_std(self.config.draft_expiry)
            .map_err(|e| Error::Internal(format!("draft expiry: {e}")))?;
        let mut draft = DraftTransaction {
            id: new_draft_id(),
            xpub_id: owner.clone(),
            configuration: config,
            status: DraftStatus::Draft,
            hex: unsigned.to_ef_hex().unwrap_or_else(|_| unsigned.to_hex()),
            expires_at: now + expiry,
            final_tx_id: None,
            metadata,
            created_at: now,
            updated_at: now,
        };

        let mut reserved = Vec::with_capacity(plan.utxos.len());
        for mut utxo in plan.utxos {
            utxo.draft_id = Some(draft.id.clone());
            utxo.updated_at = now;
            if let Err(e) = self.store.save_utxo(&utxo) {
                self.release_reservations(&reserved);
                return Err(Error::Datastore(e));
            }
            reserved.push(utxo);
        }

        if let Err(e) = self.save_draft(&mut draft) {
            log::warn!("draft: saving draft for {owner} failed, releasing {} utxos", reserved.len());
            self.release_reservations(&reserved);
            return Err(e);
        }

        log::info!(
            "draft: created {} for {owner} ({} inputs, fee {}, change {})",
            draft.id,
            reserved.len(),
            draft.configuration.fee,
            draft.configuration.change_satoshis
        );
        Ok(draft)
    }

    /// Mark a draft canceled. Its reservations stop counting immediately.
    pub fn cancel_draft(&self, id: &str) -> Result<DraftTransaction> {
        let mut draft = self.get_draft(id)?;
        if draft.status == DraftStatus::Canceled {
            return Ok(draft);
        }
        draft.status = DraftStatus::Canceled;
        self.save_draft(&mut draft)?;
        Ok(draft)
    }

    pub(crate) fn complete_draft(&self, draft: &mut DraftTransaction, final_tx_id: &str) -> Result<()> {
        draft.status = DraftStatus::Complete;
        draft.final_tx_id = Some(final_tx_id.to_string());
        self.save_draft(draft)
    }

    fn plan_spending(
        &self,
        owner: &str,
        config: &TransactionConfig,
        unit: &FeeUnit,
        now: DateTime<Utc>,
    ) -> Result<SpendingPlan> {
        let needed = config.total_output_satoshis();
        let outputs = config.outputs.len();
        let mut reservations = ReservationCheck::new(self, now);

        if !config.inputs.is_empty() {
            let mut utxos = Vec::with_capacity(config.inputs.len());
            for input in &config.inputs {
                let utxo = self
                    .store
                    .get_utxo(&input.source_tx_id, input.output_index)
                    .map_err(Error::Datastore)?
                    .ok_or_else(|| Error::UtxoNotFound {
                        txid: input.source_tx_id.clone(),
                        vout: input.output_index,
                    })?;
                if utxo.xpub_id != owner {
                    return Err(Error::UtxoNotOwned {
                        txid: utxo.transaction_id,
                        vout: utxo.output_index,
                        xpub_id: owner.to_string(),
                    });
                }
                if !utxo.is_unspent() {
                    return Err(Error::UtxoAlreadySpent {
                        spending_tx_id: utxo.spending_tx_id.clone().unwrap_or_default(),
                        txid: utxo.transaction_id,
                        vout: utxo.output_index,
                    });
                }
                if let Some(draft_id) = reservations.held_by(&utxo)? {
                    return Err(Error::UtxoReserved {
                        txid: utxo.transaction_id,
                        vout: utxo.output_index,
                        draft_id,
                    });
                }
                utxos.push(utxo);
            }
            let total: u64 = utxos.iter().map(|u| u.satoshis).sum();
            let (fee, change) = settle(unit, total, needed, utxos.len(), outputs).ok_or_else(|| {
                Error::InsufficientUtxos(format!("inputs hold {total}, outputs need {needed} plus fee"))
            })?;
            return Ok(SpendingPlan { utxos, fee, change });
        }

        let mut candidates = Vec::new();
        for utxo in self.store.unspent_utxos(owner).map_err(Error::Datastore)? {
            if utxo.is_unspent() && reservations.held_by(&utxo)?.is_none() {
                candidates.push(utxo);
            }
        }
        candidates.sort_by(|a, b| {
            b.satoshis
                .cmp(&a.satoshis)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
                .then_with(|| a.output_index.cmp(&b.output_index))
        });

        let available: u64 = candidates.iter().map(|u| u.satoshis).sum();
        let mut selected = Vec::new();
        let mut total = 0u64;
        for utxo in candidates {
            total += utxo.satoshis;
            selected.push(utxo);
            if let Some((fee, change)) = settle(unit, total, needed, selected.len(), outputs) {
                return Ok(SpendingPlan {
                    utxos: selected,
                    fee,
                    change,
                });
            }
        }
        Err(Error::InsufficientUtxos(format!(
            "{available} available, outputs need {needed} plus fee"
        )))
    }

    fn check_change_destination(&self, owner: &str, script: Option<&str>) -> Result<()> {
        let script = script.ok_or(Error::MissingChangeDestination)?;
        match self.store.get_destination(script).map_err(Error::Datastore)? {
            Some(d) if d.xpub_id == owner => Ok(()),
            _ => Err(Error::UnknownChangeDestination(script.to_string())),
        }
    }

    fn release_reservations(&self, utxos: &[Utxo]) {
        for utxo in utxos {
            let mut released = utxo.clone();
            released.draft_id = None;
            released.updated_at = Utc::now();
            if let Err(e) = self.store.save_utxo(&released) {
                log::error!("draft: cannot release reservation of {}: {e}", utxo.outpoint());
            }
        }
    }
}

/// Resolves whether a UTXO's reservation is still held, caching draft lookups.
struct ReservationCheck<'a> {
    engine: &'a Engine,
    now: DateTime<Utc>,
    drafts: HashMap<String, bool>,
}

impl<'a> ReservationCheck<'a> {
    fn new(engine: &'a Engine, now: DateTime<Utc>) -> Self {
        Self {
            engine,
            now,
            drafts: HashMap::new(),
        }
    }

    /// ID of the live draft reserving `utxo`, if any. Missing, finished or
    /// expired drafts do not hold reservations.
    fn held_by(&mut self, utxo: &Utxo) -> Result<Option<String>> {
        let Some(draft_id) = utxo.draft_id.as_deref() else {
            return Ok(None);
        };
        let holds = match self.drafts.get(draft_id) {
            Some(holds) => *holds,
            None => {
                let holds = self
                    .engine
                    .store
                    .get_draft(draft_id)
                    .map_err(Error::Datastore)?
                    .is_some_and(|d| d.holds_reservations(self.now));
                self.drafts.insert(draft_id.to_string(), holds);
                holds
            }
        };
        Ok(holds.then(|| draft_id.to_string()))
    }
}

fn unsigned_tx(config: &TransactionConfig, utxos: &[Utxo]) -> Result<Tx> {
    let mut inputs = Vec::with_capacity(utxos.len());
    for utxo in utxos {
        let locking_script = hex::decode(&utxo.script_pub_key)
            .map_err(|e| Error::InvalidHex(format!("utxo {} script: {e}", utxo.outpoint())))?;
        inputs.push(TxInput {
            source_txid: utxo.transaction_id.clone(),
            source_vout: utxo.output_index,
            unlocking_script: Vec::new(),
            sequence: u32::MAX,
            source_output: Some(TxOutput {
                satoshis: utxo.satoshis,
                locking_script,
            }),
        });
    }

    let mut outputs = Vec::with_capacity(config.outputs.len() + 1);
    for (i, output) in config.outputs.iter().enumerate() {
        outputs.push(TxOutput {
            satoshis: output.satoshis,
            locking_script: hex::decode(&output.locking_script)
                .map_err(|e| Error::InvalidHex(format!("output {i} locking script: {e}")))?,
        });
    }
    if config.change_satoshis > 0 {
        if let Some(script) = &config.change_destination {
            outputs.push(TxOutput {
                satoshis: config.change_satoshis,
                locking_script: hex::decode(script)
                    .map_err(|e| Error::InvalidHex(format!("change destination: {e}")))?,
            });
        }
    }

    Ok(Tx {
        version: 1,
        inputs,
        outputs,
        lock_time: 0,
    })
}
