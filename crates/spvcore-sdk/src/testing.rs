//! In-memory collaborators and fixtures for exercising the engine without a
//! database or a chain service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::chain::{Broadcaster, ChainError, ChainOracle, QueryOptions, TxInfo, TxStatus, filter_by_level};
use crate::datastore::Datastore;
use crate::engine::Engine;
use crate::merkle_path::{MerklePath, PathLeaf};
use crate::models::{
    Destination, DraftTransaction, Metadata, PaymailP4, SyncTransaction, Transaction,
    TransactionStatus, Utxo, Xpub,
};
use crate::paymail::PaymailNotifier;
use crate::tokens::TokenVerifier;
use crate::tx::{Tx, TxInput, TxOutput, decode_txid};

// ---------------------------------------------------------------------------
// Datastore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    xpubs: HashMap<String, Xpub>,
    destinations: HashMap<String, Destination>,
    drafts: HashMap<String, DraftTransaction>,
    transactions: HashMap<String, Transaction>,
    utxos: HashMap<(String, u32), Utxo>,
    sync: HashMap<String, SyncTransaction>,
}

/// [`Datastore`] over hash maps, with switches to make saves fail.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    pub fail_draft_saves: AtomicBool,
    pub fail_transaction_saves: AtomicBool,
    pub fail_xpub_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, String> {
        self.tables.lock().map_err(|_| "memory store poisoned".to_string())
    }

    pub fn utxo_count(&self) -> usize {
        self.tables().map(|t| t.utxos.len()).unwrap_or(0)
    }
}

fn fail_if(flag: &AtomicBool, what: &str) -> Result<(), String> {
    if flag.load(Ordering::SeqCst) {
        return Err(format!("injected {what} save failure"));
    }
    Ok(())
}

impl Datastore for MemoryStore {
    fn get_xpub(&self, id: &str) -> Result<Option<Xpub>, String> {
        Ok(self.tables()?.xpubs.get(id).cloned())
    }

    fn save_xpub(&self, xpub: &Xpub) -> Result<(), String> {
        fail_if(&self.fail_xpub_saves, "xpub")?;
        self.tables()?.xpubs.insert(xpub.id.clone(), xpub.clone());
        Ok(())
    }

    fn get_destination(&self, locking_script: &str) -> Result<Option<Destination>, String> {
        Ok(self.tables()?.destinations.get(locking_script).cloned())
    }

    fn save_destination(&self, destination: &Destination) -> Result<(), String> {
        self.tables()?
            .destinations
            .insert(destination.locking_script.clone(), destination.clone());
        Ok(())
    }

    fn get_draft(&self, id: &str) -> Result<Option<DraftTransaction>, String> {
        Ok(self.tables()?.drafts.get(id).cloned())
    }

    fn save_draft(&self, draft: &DraftTransaction) -> Result<(), String> {
        fail_if(&self.fail_draft_saves, "draft")?;
        self.tables()?.drafts.insert(draft.id.clone(), draft.clone());
        Ok(())
    }

    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, String> {
        Ok(self.tables()?.transactions.get(id).cloned())
    }

    fn save_transaction(&self, tx: &Transaction) -> Result<(), String> {
        fail_if(&self.fail_transaction_saves, "transaction")?;
        self.tables()?.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn transactions_to_sync(
        &self,
        broadcasted_before: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<String>, String> {
        let tables = self.tables()?;
        let mut due: Vec<&Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.deleted_at.is_none())
            .filter(|t| match t.status {
                Some(TransactionStatus::Broadcasted) => t.created_at < broadcasted_before,
                Some(TransactionStatus::Created) => t.created_at < created_before,
                None => true,
                _ => false,
            })
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(due.into_iter().map(|t| t.id.clone()).collect())
    }

    fn get_utxo(&self, transaction_id: &str, output_index: u32) -> Result<Option<Utxo>, String> {
        Ok(self
            .tables()?
            .utxos
            .get(&(transaction_id.to_string(), output_index))
            .cloned())
    }

    fn save_utxo(&self, utxo: &Utxo) -> Result<(), String> {
        self.tables()?.utxos.insert(
            (utxo.transaction_id.clone(), utxo.output_index),
            utxo.clone(),
        );
        Ok(())
    }

    fn utxos_by_transaction(&self, transaction_id: &str) -> Result<Vec<Utxo>, String> {
        let mut utxos: Vec<Utxo> = self
            .tables()?
            .utxos
            .values()
            .filter(|u| u.transaction_id == transaction_id)
            .cloned()
            .collect();
        utxos.sort_by_key(|u| u.output_index);
        Ok(utxos)
    }

    fn unspent_utxos(&self, xpub_id: &str) -> Result<Vec<Utxo>, String> {
        Ok(self
            .tables()?
            .utxos
            .values()
            .filter(|u| u.xpub_id == xpub_id && u.is_unspent())
            .cloned()
            .collect())
    }

    fn get_sync_transaction(&self, id: &str) -> Result<Option<SyncTransaction>, String> {
        Ok(self.tables()?.sync.get(id).cloned())
    }

    fn save_sync_transaction(&self, sync: &SyncTransaction) -> Result<(), String> {
        self.tables()?.sync.insert(sync.id.clone(), sync.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chain service
// ---------------------------------------------------------------------------

/// Scripted oracle and broadcaster that counts its calls.
///
/// Unknown transactions are not found; broadcasts succeed with
/// `SEEN_ON_NETWORK` unless a response was scripted.
#[derive(Default)]
pub struct MockChain {
    queries: Mutex<HashMap<String, Result<Option<TxInfo>, ChainError>>>,
    broadcast_response: Mutex<Option<Result<TxInfo, ChainError>>>,
    broadcasted: Mutex<Vec<String>>,
    pub query_calls: AtomicUsize,
    pub broadcast_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query(&self, txid: &str, response: Result<Option<TxInfo>, ChainError>) {
        if let Ok(mut q) = self.queries.lock() {
            q.insert(txid.to_string(), response);
        }
    }

    pub fn set_broadcast(&self, response: Result<TxInfo, ChainError>) {
        if let Ok(mut b) = self.broadcast_response.lock() {
            *b = Some(response);
        }
    }

    pub fn broadcasted(&self) -> Vec<String> {
        self.broadcasted.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcast_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainOracle for MockChain {
    async fn query_transaction(
        &self,
        txid: &str,
        opts: QueryOptions,
    ) -> Result<Option<TxInfo>, ChainError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .queries
            .lock()
            .ok()
            .and_then(|q| q.get(txid).cloned())
            .unwrap_or(Ok(None));
        scripted.map(|info| info.and_then(|i| filter_by_level(i, opts.required_level)))
    }
}

#[async_trait]
impl Broadcaster for MockChain {
    async fn broadcast(&self, tx: &Tx) -> Result<TxInfo, ChainError> {
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        let txid = tx.txid();
        let scripted = self.broadcast_response.lock().ok().and_then(|b| b.clone());
        let response = scripted.unwrap_or_else(|| Ok(TxInfo::new(txid.clone(), TxStatus::SeenOnNetwork)));
        if response.is_ok() {
            if let Ok(mut b) = self.broadcasted.lock() {
                b.push(txid);
            }
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Paymail and tokens
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockNotifier {
    failure: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: &str) {
        if let Ok(mut f) = self.failure.lock() {
            *f = Some(message.to_string());
        }
    }
}

#[async_trait]
impl PaymailNotifier for MockNotifier {
    async fn notify(&self, _address: &str, _p2p: &PaymailP4, _reference: &str, _tx: &Tx) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().ok().and_then(|f| f.clone()) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MockTokens {
    failure: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl MockTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: &str) {
        if let Ok(mut f) = self.failure.lock() {
            *f = Some(message.to_string());
        }
    }
}

#[async_trait]
impl TokenVerifier for MockTokens {
    async fn verify_and_save_token_transfer(&self, _tx_hex: &str) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().ok().and_then(|f| f.clone()) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Hex P2PKH locking script whose hash is `tag` repeated.
pub fn p2pkh_script(tag: u8) -> String {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    hex::encode(script)
}

fn outputs_from(outputs: &[(String, u64)]) -> Vec<TxOutput> {
    outputs
        .iter()
        .map(|(script, satoshis)| TxOutput {
            satoshis: *satoshis,
            locking_script: hex::decode(script).unwrap_or_default(),
        })
        .collect()
}

/// A transaction paying `outputs` from an unrelated, random source.
pub fn funding_tx(outputs: &[(String, u64)]) -> Tx {
    Tx {
        version: 1,
        inputs: vec![TxInput {
            source_txid: hex::encode(rand::random::<[u8; 32]>()),
            source_vout: 0,
            unlocking_script: vec![0x51],
            sequence: u32::MAX,
            source_output: None,
        }],
        outputs: outputs_from(outputs),
        lock_time: 0,
    }
}

pub fn spend_tx(inputs: &[(String, u32)], outputs: &[(String, u64)]) -> Tx {
    Tx {
        version: 1,
        inputs: inputs
            .iter()
            .map(|(txid, vout)| TxInput {
                source_txid: txid.clone(),
                source_vout: *vout,
                unlocking_script: vec![0x51],
                sequence: u32::MAX,
                source_output: None,
            })
            .collect(),
        outputs: outputs_from(outputs),
        lock_time: 0,
    }
}

/// "Sign" a draft: its unsigned transaction with a dummy unlocking script
/// on every input, keeping the source outputs.
pub fn sign_draft(draft: &DraftTransaction) -> Tx {
    let mut tx = Tx::from_hex(&draft.hex).unwrap_or_else(|_| Tx {
        version: 1,
        inputs: Vec::new(),
        outputs: Vec::new(),
        lock_time: 0,
    });
    for input in &mut tx.inputs {
        input.unlocking_script = vec![0x51];
    }
    tx
}

/// A one-level merkle path proving `txid` at `block_height`, as hex.
pub fn merkle_path_for(txid: &str, block_height: u64) -> String {
    let path = MerklePath {
        block_height,
        path: vec![vec![
            PathLeaf {
                offset: 0,
                hash: decode_txid(txid).ok(),
                txid: true,
            },
            PathLeaf {
                offset: 1,
                hash: Some([7; 32]),
                txid: false,
            },
        ]],
    };
    path.to_hex()
}

/// Move a record's timestamps into the past.
pub fn age_transaction(store: &dyn Datastore, id: &str, created_ago: ChronoDuration, updated_ago: ChronoDuration) {
    if let Ok(Some(mut tx)) = store.get_transaction(id) {
        let now = Utc::now();
        tx.created_at = now - created_ago;
        tx.updated_at = now - updated_ago;
        let _ = store.save_transaction(&tx);
    }
}

/// An engine wired to in-memory collaborators.
pub struct Fixture {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<MockChain>,
    pub notifier: Arc<MockNotifier>,
    pub tokens: Arc<MockTokens>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(MockChain::new());
        let notifier = Arc::new(MockNotifier::new());
        let tokens = Arc::new(MockTokens::new());
        let engine = Engine::new(store.clone(), chain.clone(), chain.clone())
            .with_notifier(notifier.clone())
            .with_token_verifier(tokens.clone());
        Self {
            engine: Arc::new(engine),
            store,
            chain,
            notifier,
            tokens,
        }
    }

    /// Register `raw_xpub` with a receiving script built from `tag` and
    /// fund it with one output per amount. Returns the owner ID, its
    /// script, and the recorded funding transaction.
    pub async fn funded_owner(&self, raw_xpub: &str, tag: u8, amounts: &[u64]) -> (String, String, Transaction) {
        let xpub = self.engine.new_xpub(raw_xpub).unwrap_or_else(|e| panic!("new_xpub: {e}"));
        let script = p2pkh_script(tag);
        self.engine
            .register_destination(&xpub.id, &script, "")
            .unwrap_or_else(|e| panic!("register_destination: {e}"));
        let outputs: Vec<(String, u64)> = amounts.iter().map(|a| (script.clone(), *a)).collect();
        let funding = self
            .engine
            .record_raw_transaction(&funding_tx(&outputs).to_hex(), Metadata::new())
            .await
            .unwrap_or_else(|e| panic!("record funding: {e}"));
        (xpub.id, script, funding)
    }

    pub fn balance(&self, xpub_id: &str) -> u64 {
        self.engine
            .get_xpub(xpub_id)
            .map(|x| x.current_balance)
            .unwrap_or_default()
    }
}
