use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Transaction, TransactionStatus};
use crate::tx::Tx;

/// A P2P payment whose sender is also an owner of this ledger. The sender
/// already recorded it; the receiving side only has to get it broadcast.
#[derive(Debug, Clone)]
pub struct InternalIncomingTx {
    pub tx: Option<Tx>,
}

impl InternalIncomingTx {
    pub fn validate(&self) -> Result<()> {
        if self.tx.is_none() {
            return Err(Error::MissingTransaction);
        }
        Ok(())
    }

    pub async fn execute(&self, engine: &Engine) -> Result<Transaction> {
        let tx = self.tx.as_ref().ok_or(Error::MissingTransaction)?;
        let mut record = engine.get_transaction(&tx.txid())?;
        if matches!(
            record.status,
            Some(TransactionStatus::Broadcasted | TransactionStatus::Mined)
        ) {
            return Ok(record);
        }

        match engine.broadcast(tx).await {
            Ok(_) => {
                record.set_status(TransactionStatus::Broadcasted);
                engine.persist_transaction(&mut record)?;
                engine.sync_record_for_status(&record);
                log::info!("internal_incoming_tx: broadcast {}", record.id);
            }
            // the sender retries on its side
            Err(e) => log::warn!("internal_incoming_tx: broadcasting {} failed: {e}", record.id),
        }
        Ok(record)
    }
}
