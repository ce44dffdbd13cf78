use std::sync::Arc;

use crate::datastore::Datastore;
use crate::error::{Error, Result};
use crate::tx::Tx;

/// Fills in the source outputs of a transaction from transactions already
/// recorded in the datastore, producing its Extended Format hex.
#[derive(Clone)]
pub struct EfConverter {
    store: Arc<dyn Datastore>,
}

impl EfConverter {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Fails if any spent output belongs to a transaction we do not know.
    pub fn convert(&self, tx: &Tx) -> Result<String> {
        if tx.is_extended() {
            return tx.to_ef_hex();
        }
        let mut tx = tx.clone();
        for input in tx.inputs.iter_mut().filter(|i| i.source_output.is_none()) {
            let source = self
                .store
                .get_transaction(&input.source_txid)
                .map_err(Error::Datastore)?
                .ok_or_else(|| Error::TransactionNotFound(input.source_txid.clone()))?;
            let parsed = source.parsed()?;
            let output = parsed
                .outputs
                .get(input.source_vout as usize)
                .cloned()
                .ok_or_else(|| Error::UtxoNotFound {
                    txid: input.source_txid.clone(),
                    vout: input.source_vout,
                })?;
            input.source_output = Some(output);
        }
        tx.to_ef_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transaction;
    use crate::testing::{MemoryStore, p2pkh_script, spend_tx, funding_tx};

    #[test]
    fn fills_sources_from_store() {
        let store = Arc::new(MemoryStore::new());
        let funding = funding_tx(&[(p2pkh_script(1), 10_000)]);
        store
            .save_transaction(&Transaction::new(&funding))
            .unwrap();

        let spend = spend_tx(&[(funding.txid(), 0)], &[(p2pkh_script(2), 9_000)]);
        let converter = EfConverter::new(store);
        let ef = Tx::from_hex(&converter.convert(&spend).unwrap()).unwrap();
        assert!(ef.is_extended());
        assert_eq!(ef.inputs[0].source_output.as_ref().unwrap().satoshis, 10_000);
        assert_eq!(ef.txid(), spend.txid());
    }

    #[test]
    fn unknown_source_fails() {
        let converter = EfConverter::new(Arc::new(MemoryStore::new()));
        let spend = spend_tx(&[("ab".repeat(32), 0)], &[(p2pkh_script(2), 9_000)]);
        assert!(matches!(
            converter.convert(&spend),
            Err(Error::TransactionNotFound(_))
        ));
    }
}
