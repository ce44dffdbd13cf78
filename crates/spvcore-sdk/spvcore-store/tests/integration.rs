use std::sync::Arc;

use chrono::{Duration, Utc};

use spvcore_sdk::testing::{MockChain, funding_tx, p2pkh_script, sign_draft};
use spvcore_sdk::{
    Datastore, Engine, Metadata, SyncConfig, SyncStatus, SyncTransaction, Transaction,
    TransactionConfig, TransactionStatus, TxOutputConfig, Utxo,
};
use spvcore_store::SqliteDatastore;

// ==================== Test Helpers ====================

fn store() -> SqliteDatastore {
    SqliteDatastore::open_in_memory().unwrap()
}

fn record_at(store: &SqliteDatastore, satoshis: u64, status: Option<TransactionStatus>, age: Duration) -> Transaction {
    let mut tx = Transaction::new(&funding_tx(&[(p2pkh_script(1), satoshis)]));
    tx.status = status;
    tx.created_at = Utc::now() - age;
    tx.updated_at = tx.created_at;
    store.save_transaction(&tx).unwrap();
    tx
}

// ==================== Round trips ====================

#[test]
fn transaction_round_trip() {
    let store = store();
    let mut tx = Transaction::new(&funding_tx(&[(p2pkh_script(1), 700)]));
    tx.status = Some(TransactionStatus::Mined);
    tx.draft_id = "draft-1".into();
    tx.xpub_in_ids = vec!["a".into()];
    tx.xpub_out_ids = vec!["a".into(), "b".into()];
    tx.xpub_output_value.insert("a".into(), -700);
    tx.xpub_output_value.insert("b".into(), 650);
    tx.fee = 50;
    tx.block_height = 800_000;
    tx.metadata.insert("note".into(), serde_json::json!("rent"));
    store.save_transaction(&tx).unwrap();

    let loaded = store.get_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(loaded.status, Some(TransactionStatus::Mined));
    assert_eq!(loaded.xpub_output_value, tx.xpub_output_value);
    assert_eq!(loaded.metadata, tx.metadata);
    assert_eq!(loaded.created_at, tx.created_at);
    assert_eq!(loaded.hex, tx.hex);
    assert!(store.get_transaction("missing").unwrap().is_none());
}

#[test]
fn saves_replace_rows() {
    let store = store();
    let mut utxo = Utxo::new("ab".repeat(32), 3, "owner", 1_000, p2pkh_script(1));
    store.save_utxo(&utxo).unwrap();
    utxo.spending_tx_id = Some("cd".repeat(32));
    store.save_utxo(&utxo).unwrap();

    let loaded = store.get_utxo(&utxo.transaction_id, 3).unwrap().unwrap();
    assert_eq!(loaded.spending_tx_id, utxo.spending_tx_id);
    assert_eq!(store.utxos_by_transaction(&utxo.transaction_id).unwrap().len(), 1);
    assert!(store.unspent_utxos("owner").unwrap().is_empty());
}

#[test]
fn unspent_excludes_spent_and_deleted() {
    let store = store();
    let txid = "ab".repeat(32);
    let live = Utxo::new(txid.clone(), 0, "owner", 10, p2pkh_script(1));
    let mut spent = Utxo::new(txid.clone(), 1, "owner", 20, p2pkh_script(1));
    spent.spending_tx_id = Some("cd".repeat(32));
    let mut deleted = Utxo::new(txid.clone(), 2, "owner", 30, p2pkh_script(1));
    deleted.deleted_at = Some(Utc::now());
    let other = Utxo::new(txid.clone(), 3, "someone-else", 40, p2pkh_script(2));
    for u in [&live, &spent, &deleted, &other] {
        store.save_utxo(u).unwrap();
    }

    let unspent = store.unspent_utxos("owner").unwrap();
    assert_eq!(unspent, vec![live]);
    let all = store.utxos_by_transaction(&txid).unwrap();
    assert_eq!(all.iter().map(|u| u.output_index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[test]
fn sync_record_round_trip() {
    let store = store();
    let mut sync = SyncTransaction::new("ab".repeat(32), SyncConfig::default(), false);
    sync.advance_broadcast(SyncStatus::Complete);
    store.save_sync_transaction(&sync).unwrap();

    let loaded = store.get_sync_transaction(&sync.id).unwrap().unwrap();
    assert_eq!(loaded.broadcast_status, SyncStatus::Complete);
    assert_eq!(loaded.p2p_status, SyncStatus::Skipped);
    assert_eq!(loaded.sync_status, SyncStatus::Ready);
}

// ==================== Sync candidates ====================

#[test]
fn transactions_to_sync_selects_by_status_and_age() {
    let store = store();
    let now = Utc::now();
    let old_created = record_at(&store, 1, Some(TransactionStatus::Created), Duration::minutes(30));
    let young_created = record_at(&store, 2, Some(TransactionStatus::Created), Duration::minutes(1));
    let old_broadcast = record_at(&store, 3, Some(TransactionStatus::Broadcasted), Duration::hours(2));
    let young_broadcast = record_at(&store, 4, Some(TransactionStatus::Broadcasted), Duration::minutes(30));
    let no_status = record_at(&store, 5, None, Duration::seconds(1));
    record_at(&store, 6, Some(TransactionStatus::Mined), Duration::hours(5));
    record_at(&store, 7, Some(TransactionStatus::Problematic), Duration::hours(5));
    let mut deleted = record_at(&store, 8, Some(TransactionStatus::Created), Duration::hours(5));
    deleted.deleted_at = Some(now);
    store.save_transaction(&deleted).unwrap();

    let ids = store
        .transactions_to_sync(now - Duration::hours(1), now - Duration::minutes(10))
        .unwrap();
    assert_eq!(ids, vec![old_broadcast.id, old_created.id, no_status.id]);
    assert!(!ids.contains(&young_created.id));
    assert!(!ids.contains(&young_broadcast.id));
}

// ==================== Engine over SQLite ====================

#[tokio::test]
async fn engine_records_outgoing_transaction_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let store = Arc::new(SqliteDatastore::open(path.to_str().unwrap()).unwrap());
    let chain = Arc::new(MockChain::new());
    let engine = Engine::new(store.clone(), chain.clone(), chain.clone());

    let xpub = engine.new_xpub("xpub-alice").unwrap();
    let script = p2pkh_script(1);
    engine.register_destination(&xpub.id, &script, "1Alice").unwrap();
    let funding = funding_tx(&[(script.clone(), 10_000)]);
    engine
        .record_raw_transaction(&funding.to_hex(), Metadata::new())
        .await
        .unwrap();
    assert_eq!(engine.get_xpub(&xpub.id).unwrap().current_balance, 10_000);

    let config = TransactionConfig {
        outputs: vec![TxOutputConfig {
            to: String::new(),
            locking_script: p2pkh_script(9),
            satoshis: 4_000,
            paymail_p4: None,
        }],
        change_destination: Some(script),
        ..Default::default()
    };
    let draft = engine.new_draft("xpub-alice", config, Metadata::new()).await.unwrap();
    let signed = sign_draft(&draft);
    let tx = engine
        .record_transaction("xpub-alice", &signed.to_hex(), &draft.id, Metadata::new())
        .await
        .unwrap();
    assert_eq!(tx.status, Some(TransactionStatus::Broadcasted));
    drop(engine);

    // everything survives a reopen
    let reopened = SqliteDatastore::open(path.to_str().unwrap()).unwrap();
    let stored = reopened.get_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(stored.status, Some(TransactionStatus::Broadcasted));
    assert_eq!(reopened.get_xpub(&xpub.id).unwrap().unwrap().current_balance, 5_999);
    let spent = reopened.get_utxo(&funding.txid(), 0).unwrap().unwrap();
    assert_eq!(spent.spending_tx_id.as_deref(), Some(tx.id.as_str()));
    let saved_draft = reopened.get_draft(&draft.id).unwrap().unwrap();
    assert_eq!(saved_draft.configuration, draft.configuration);
    assert_eq!(saved_draft.final_tx_id.as_deref(), Some(tx.id.as_str()));
}
