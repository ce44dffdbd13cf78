use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use spvcore_sdk::ef::EfConverter;
use spvcore_sdk::{
    ArcService, Datastore, Engine, PaymailP2pClient, SyncTask, TokenOverlayClient,
};
use spvcore_store::SqliteDatastore;

use crate::callback::CallbackHandler;
use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Store(#[from] spvcore_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] spvcore_sdk::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A running node: the engine plus its background reconciliation task.
pub struct Node {
    engine: Arc<Engine>,
    callbacks: Option<CallbackHandler>,
    shutdown: CancellationToken,
    sync_handle: Option<JoinHandle<()>>,
}

impl Node {
    /// Wire storage, the chain service client and the optional
    /// collaborators, then start the reconciliation loop.
    pub fn start(config: &AppConfig) -> crate::Result<Self> {
        let store: Arc<dyn Datastore> = Arc::new(SqliteDatastore::open(&config.database_path)?);
        log::info!("node: ledger at {}", config.database_path);
        Self::start_with_store(config, store)
    }

    pub fn start_with_store(config: &AppConfig, store: Arc<dyn Datastore>) -> crate::Result<Self> {
        let shutdown = CancellationToken::new();
        let arc = Arc::new(ArcService::new(
            config.arc_config(),
            Some(EfConverter::new(store.clone())),
        )?);
        let notifier = Arc::new(PaymailP2pClient::new(config.paymail_timeout())?);

        let mut engine = Engine::new(store, arc.clone(), arc)
            .with_config(config.engine_config())
            .with_notifier(notifier)
            .with_shutdown(shutdown.clone());
        match config.token_overlay.as_ref().filter(|t| !t.url.is_empty()) {
            Some(overlay) => {
                let client = TokenOverlayClient::new(&overlay.url, config.paymail_timeout())?;
                engine = engine.with_token_verifier(Arc::new(client));
                log::info!("node: token transfers verified against {}", overlay.url);
            }
            None => log::info!("node: no token overlay configured"),
        }
        let engine = Arc::new(engine);

        let callbacks = config
            .callback_token()
            .map(|token| CallbackHandler::new(engine.clone(), token));
        if callbacks.is_some() {
            log::info!("node: chain service callbacks enabled");
        }

        let task = SyncTask::new(engine.clone(), config.sync_config());
        let interval = config.sync_interval();
        let cancel = shutdown.clone();
        let sync_handle = tokio::spawn(async move { task.run(interval, cancel).await });

        Ok(Self {
            engine,
            callbacks,
            shutdown,
            sync_handle: Some(sync_handle),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn callbacks(&self) -> Option<&CallbackHandler> {
        self.callbacks.as_ref()
    }

    /// Cancel in-flight calls and wait for the reconciliation loop to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sync_handle.take() {
            if let Err(e) = handle.await {
                log::error!("node: sync task ended abnormally: {e}");
            }
        }
        log::info!("node: stopped");
    }
}
