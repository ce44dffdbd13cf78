use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Metadata, SyncConfig, Transaction, TransactionStatus};
use crate::record::{ensure_sync_record, process_utxos};
use crate::tx::Tx;

/// A transaction recorded as-is, without a draft.
#[derive(Debug, Clone)]
pub struct RawIncomingTx {
    pub tx: Option<Tx>,
    pub metadata: Metadata,
}

impl RawIncomingTx {
    pub fn validate(&self) -> Result<()> {
        if self.tx.is_none() {
            return Err(Error::MissingTransaction);
        }
        Ok(())
    }

    pub async fn execute(&self, engine: &Engine) -> Result<Transaction> {
        let tx = self.tx.as_ref().ok_or(Error::MissingTransaction)?;
        let txid = tx.txid();
        if let Some(existing) = engine.find_transaction(&txid)? {
            log::debug!("raw_incoming_tx: {txid} already recorded");
            return Ok(existing);
        }

        let mut record = Transaction::new(tx);
        record.status = Some(TransactionStatus::Created);
        record.metadata.extend(self.metadata.clone());

        process_utxos(engine, &mut record, tx).await?;
        engine.persist_transaction(&mut record)?;

        let policy = SyncConfig {
            broadcast: false,
            broadcast_instant: false,
            paymail_p2p: false,
            sync_on_chain: true,
        };
        if let Err(e) = ensure_sync_record(engine, &record.id, policy, false) {
            log::error!("raw_incoming_tx: cannot create sync record for {txid}: {e}");
        }
        log::info!("raw_incoming_tx: recorded {txid}");
        Ok(record)
    }
}
