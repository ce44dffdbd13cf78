use chrono::Duration as ChronoDuration;

use spvcore_sdk::chain::{ChainError, TxInfo, TxStatus};
use spvcore_sdk::testing::{
    Fixture, age_transaction, funding_tx, merkle_path_for, p2pkh_script, sign_draft,
};
use spvcore_sdk::{
    Datastore, Error, Metadata, SyncStatus, SyncTask, SyncTaskConfig, Transaction,
    TransactionConfig, TransactionStatus, TxCallback, TxOutputConfig,
};

async fn recorded(fx: &Fixture, satoshis: u64) -> Transaction {
    let tx = funding_tx(&[(p2pkh_script(3), satoshis)]);
    fx.engine
        .record_raw_transaction(&tx.to_hex(), Metadata::new())
        .await
        .unwrap()
}

fn set_status(fx: &Fixture, id: &str, status: TransactionStatus) {
    let mut tx = fx.store.get_transaction(id).unwrap().unwrap();
    tx.status = Some(status);
    fx.store.save_transaction(&tx).unwrap();
}

fn mined(txid: &str) -> TxInfo {
    TxInfo {
        block_hash: "00".repeat(32),
        block_height: 800_000,
        merkle_path: merkle_path_for(txid, 800_000),
        ..TxInfo::new(txid, TxStatus::Mined)
    }
}

fn task(fx: &Fixture) -> SyncTask {
    SyncTask::new(fx.engine.clone(), SyncTaskConfig::default())
}

fn status(fx: &Fixture, id: &str) -> Option<TransactionStatus> {
    fx.engine.get_transaction(id).unwrap().status
}

#[tokio::test]
async fn young_transactions_are_not_swept() {
    let fx = Fixture::new();
    recorded(&fx, 1_000).await;

    let report = task(&fx).run_once().await;
    assert_eq!(report.candidates, 0);
    assert_eq!(fx.chain.query_count(), 0);
}

#[tokio::test]
async fn unseen_created_transaction_is_rebroadcast() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));

    let report = task(&fx).run_once().await;
    assert_eq!(report.candidates, 1);
    assert_eq!(report.broadcasted, 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Broadcasted));
    assert_eq!(fx.chain.broadcasted(), vec![tx.id.clone()]);

    let sync = fx.engine.get_sync_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(sync.broadcast_status, SyncStatus::Skipped);
}

#[tokio::test]
async fn second_sweep_without_news_changes_nothing() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));

    let first = task(&fx).run_once().await;
    assert_eq!(first.broadcasted, 1);

    let second = task(&fx).run_once().await;
    assert_eq!(second.candidates, 1);
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.broadcasted + second.mined + second.problematic, 0);
    assert_eq!(fx.chain.broadcast_count(), 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Broadcasted));
}

#[tokio::test]
async fn rejected_rebroadcast_marks_problematic() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));
    fx.chain
        .set_broadcast(Err(ChainError::ProblematicStatus("DOUBLE_SPEND_ATTEMPTED".into())));

    let report = task(&fx).run_once().await;
    assert_eq!(report.problematic, 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Problematic));
}

#[tokio::test]
async fn failed_rebroadcast_is_retried_later() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));
    fx.chain.set_broadcast(Err(ChainError::FeeTooLow("fee too low".into())));

    let report = task(&fx).run_once().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Created));
}

#[tokio::test]
async fn mined_transaction_gets_its_proof() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    set_status(&fx, &tx.id, TransactionStatus::Broadcasted);
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));
    fx.chain.set_query(&tx.id, Ok(Some(mined(&tx.id))));

    let report = task(&fx).run_once().await;
    assert_eq!(report.mined, 1);

    let stored = fx.engine.get_transaction(&tx.id).unwrap();
    assert_eq!(stored.status, Some(TransactionStatus::Mined));
    assert_eq!(stored.block_height, 800_000);
    assert_eq!(stored.merkle_path, merkle_path_for(&tx.id, 800_000));
    let sync = fx.engine.get_sync_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(sync.sync_status, SyncStatus::Complete);

    // mined records leave the sweep
    let again = task(&fx).run_once().await;
    assert_eq!(again.candidates, 0);
}

#[tokio::test]
async fn mined_report_without_merkle_path_is_ignored() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    set_status(&fx, &tx.id, TransactionStatus::Broadcasted);
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));
    let mut info = mined(&tx.id);
    info.merkle_path = String::new();
    fx.chain.set_query(&tx.id, Ok(Some(info)));

    let report = task(&fx).run_once().await;
    assert_eq!(report.skipped, 1);
    let stored = fx.engine.get_transaction(&tx.id).unwrap();
    assert_eq!(stored.status, Some(TransactionStatus::Broadcasted));
    assert!(stored.merkle_path.is_empty());
}

#[tokio::test]
async fn long_unknown_transaction_becomes_problematic() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    set_status(&fx, &tx.id, TransactionStatus::Broadcasted);
    age_transaction(&*fx.store, &tx.id, ChronoDuration::hours(25), ChronoDuration::hours(25));

    let report = task(&fx).run_once().await;
    assert_eq!(report.problematic, 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Problematic));
    assert_eq!(fx.chain.broadcast_count(), 0);
}

#[tokio::test]
async fn unreachable_chain_service_stops_the_sweep() {
    let fx = Fixture::new();
    let a = recorded(&fx, 1_000).await;
    let b = recorded(&fx, 2_000).await;
    for (id, age) in [(&a.id, 12), (&b.id, 11)] {
        age_transaction(&*fx.store, id, ChronoDuration::minutes(age), ChronoDuration::minutes(age));
        fx.chain
            .set_query(id, Err(ChainError::Unreachable("connection refused".into())));
    }

    let report = task(&fx).run_once().await;
    assert_eq!(report.candidates, 2);
    assert!(report.aborted);
    assert_eq!(fx.chain.query_count(), 1);
    assert_eq!(status(&fx, &a.id), Some(TransactionStatus::Created));
    assert_eq!(status(&fx, &b.id), Some(TransactionStatus::Created));
}

#[tokio::test]
async fn callbacks_extend_the_grace_period() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    set_status(&fx, &tx.id, TransactionStatus::Broadcasted);
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));

    let config = SyncTaskConfig {
        callback_enabled: true,
        ..Default::default()
    };
    let report = SyncTask::new(fx.engine.clone(), config).run_once().await;
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn sweep_stops_on_cancel() {
    let fx = Fixture::new();
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        task(&fx).run(std::time::Duration::from_secs(60), cancel),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn query_error_on_stale_transaction_marks_problematic() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    set_status(&fx, &tx.id, TransactionStatus::Broadcasted);
    age_transaction(&*fx.store, &tx.id, ChronoDuration::hours(25), ChronoDuration::hours(25));
    fx.chain
        .set_query(&tx.id, Err(ChainError::Unprocessable("500 internal".into())));

    let report = task(&fx).run_once().await;
    assert_eq!(report.problematic, 1);
    assert!(!report.aborted);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Problematic));
}

#[tokio::test]
async fn query_error_on_fresh_transaction_is_retried_later() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    age_transaction(&*fx.store, &tx.id, ChronoDuration::minutes(11), ChronoDuration::minutes(11));
    fx.chain
        .set_query(&tx.id, Err(ChainError::Unprocessable("500 internal".into())));

    let report = task(&fx).run_once().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.problematic, 0);
    assert_eq!(fx.chain.broadcast_count(), 0);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Created));
}

#[tokio::test]
async fn legacy_transaction_without_status_is_swept() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    let mut legacy = fx.store.get_transaction(&tx.id).unwrap().unwrap();
    legacy.status = None;
    fx.store.save_transaction(&legacy).unwrap();
    fx.chain.set_query(&tx.id, Ok(Some(mined(&tx.id))));

    // no grace window applies to records without a status
    let report = task(&fx).run_once().await;
    assert_eq!(report.candidates, 1);
    assert_eq!(report.mined, 1);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Mined));
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn callback_marks_transaction_mined() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;

    let updated = fx
        .engine
        .update_transaction(&TxCallback {
            tx_id: tx.id.clone(),
            block_hash: "11".repeat(32),
            block_height: 800_001,
            tx_status: TxStatus::Mined,
            merkle_path: merkle_path_for(&tx.id, 800_001),
        })
        .await
        .unwrap();
    assert_eq!(updated.status, Some(TransactionStatus::Mined));
    assert_eq!(updated.block_height, 800_001);
    assert_eq!(updated.block_hash, "11".repeat(32));
}

#[tokio::test]
async fn callback_without_merkle_path_is_rejected() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;

    let res = fx
        .engine
        .update_transaction(&TxCallback {
            tx_id: tx.id.clone(),
            block_hash: String::new(),
            block_height: 0,
            tx_status: TxStatus::SeenOnNetwork,
            merkle_path: String::new(),
        })
        .await;
    assert!(matches!(res, Err(Error::InvalidMerklePath(_))));
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Created));
}

#[tokio::test]
async fn callback_for_unknown_transaction_is_not_found() {
    let fx = Fixture::new();
    let txid = "cd".repeat(32);
    let res = fx
        .engine
        .update_transaction(&TxCallback {
            tx_id: txid.clone(),
            block_hash: String::new(),
            block_height: 1,
            tx_status: TxStatus::Mined,
            merkle_path: merkle_path_for(&txid, 1),
        })
        .await;
    assert!(matches!(res, Err(Error::TransactionNotFound(_))));
}

#[tokio::test]
async fn late_callback_does_not_unmine_a_transaction() {
    let fx = Fixture::new();
    let tx = recorded(&fx, 1_000).await;
    let mined_cb = TxCallback {
        tx_id: tx.id.clone(),
        block_hash: "11".repeat(32),
        block_height: 800_001,
        tx_status: TxStatus::Mined,
        merkle_path: merkle_path_for(&tx.id, 800_001),
    };
    fx.engine.update_transaction(&mined_cb).await.unwrap();

    let late = TxCallback {
        tx_status: TxStatus::SeenOnNetwork,
        block_hash: String::new(),
        block_height: 0,
        ..mined_cb
    };
    let after = fx.engine.update_transaction(&late).await.unwrap();
    assert_eq!(after.status, Some(TransactionStatus::Mined));
    assert_eq!(after.block_height, 800_001);
    assert_eq!(status(&fx, &tx.id), Some(TransactionStatus::Mined));
}

#[tokio::test]
async fn callback_leaves_reverted_transaction_alone() {
    let fx = Fixture::new();
    let (_, change, _) = fx.funded_owner("xpub-alice", 1, &[10_000]).await;
    let config = TransactionConfig {
        outputs: vec![TxOutputConfig {
            to: String::new(),
            locking_script: p2pkh_script(9),
            satoshis: 4_000,
            paymail_p4: None,
        }],
        change_destination: Some(change),
        ..Default::default()
    };
    let draft = fx
        .engine
        .new_draft("xpub-alice", config, Metadata::new())
        .await
        .unwrap();
    let signed = sign_draft(&draft);
    let tx = fx
        .engine
        .record_transaction("xpub-alice", &signed.to_hex(), &draft.id, Metadata::new())
        .await
        .unwrap();
    fx.engine.revert_transaction(&tx.id).await.unwrap();

    let after = fx
        .engine
        .update_transaction(&TxCallback {
            tx_id: tx.id.clone(),
            block_hash: String::new(),
            block_height: 0,
            tx_status: TxStatus::SeenOnNetwork,
            merkle_path: merkle_path_for(&tx.id, 800_001),
        })
        .await
        .unwrap();
    assert_eq!(after.status, Some(TransactionStatus::Reverted));

    let stored = fx.store.get_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(stored.status, Some(TransactionStatus::Reverted));
    assert!(stored.deleted_at.is_some());
}
