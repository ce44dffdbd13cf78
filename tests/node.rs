use std::sync::Arc;

use spvcore_lib::{AppConfig, CallbackError, CallbackHandler, Node};
use spvcore_sdk::testing::{Fixture, MemoryStore, funding_tx, merkle_path_for, p2pkh_script};
use spvcore_sdk::{Metadata, TransactionStatus};

// ==================== Test Helpers ====================

async fn recorded(fx: &Fixture) -> String {
    let tx = funding_tx(&[(p2pkh_script(4), 2_500)]);
    fx.engine
        .record_raw_transaction(&tx.to_hex(), Metadata::new())
        .await
        .unwrap()
        .id
}

fn mined_body(txid: &str) -> String {
    serde_json::json!({
        "txid": txid,
        "txStatus": "MINED",
        "blockHash": "22".repeat(32),
        "blockHeight": 800_002,
        "merklePath": merkle_path_for(txid, 800_002),
    })
    .to_string()
}

// ==================== Callbacks ====================

#[tokio::test]
async fn callback_with_valid_token_updates_the_record() {
    let fx = Fixture::new();
    let txid = recorded(&fx).await;
    let handler = CallbackHandler::new(fx.engine.clone(), "cb-secret");

    let tx = handler
        .handle(Some("Bearer cb-secret"), &mined_body(&txid))
        .await
        .unwrap();
    assert_eq!(tx.status, Some(TransactionStatus::Mined));
    assert_eq!(tx.block_height, 800_002);
}

#[tokio::test]
async fn callback_with_wrong_token_is_unauthorized() {
    let fx = Fixture::new();
    let txid = recorded(&fx).await;
    let handler = CallbackHandler::new(fx.engine.clone(), "cb-secret");

    for auth in [None, Some("Bearer nope"), Some("cb-secret")] {
        let err = handler.handle(auth, &mined_body(&txid)).await.unwrap_err();
        assert!(matches!(err, CallbackError::Unauthorized));
        assert_eq!(err.status_code(), 401);
    }
    let stored = fx.engine.get_transaction(&txid).unwrap();
    assert_eq!(stored.status, Some(TransactionStatus::Created));
}

#[tokio::test]
async fn malformed_callback_is_a_bad_request() {
    let fx = Fixture::new();
    let handler = CallbackHandler::new(fx.engine.clone(), "");

    let err = handler.handle(None, "{not json").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn callback_for_unknown_transaction_is_not_found() {
    let fx = Fixture::new();
    let handler = CallbackHandler::new(fx.engine.clone(), "");

    let err = handler.handle(None, &mined_body(&"ef".repeat(32))).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

// ==================== Node ====================

#[tokio::test]
async fn node_starts_and_stops() {
    let config = AppConfig::from_json(
        r#"{"arc": {"callback": {"url": "https://node.example/cb", "token": "t"}}, "sync": {"intervalSecs": 3600}}"#,
    )
    .unwrap();
    let node = Node::start_with_store(&config, Arc::new(MemoryStore::new())).unwrap();
    assert!(node.callbacks().is_some());

    let xpub = node.engine().new_xpub("xpub-node").unwrap();
    assert_eq!(node.engine().get_xpub(&xpub.id).unwrap().current_balance, 0);

    tokio::time::timeout(std::time::Duration::from_secs(5), node.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn node_opens_its_ledger_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        database_path: dir.path().join("ledger.db").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let node = Node::start(&config).unwrap();
    assert!(node.callbacks().is_none());
    node.shutdown().await;
    assert!(dir.path().join("ledger.db").exists());
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
fn config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.json");
    std::fs::write(&path, r#"{"databasePath": "/var/lib/spvcore.db", "sync": {"mineGraceSecs": 30}}"#).unwrap();
    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.database_path, "/var/lib/spvcore.db");
    assert_eq!(config.sync_config().mine_grace, std::time::Duration::from_secs(30));
}
