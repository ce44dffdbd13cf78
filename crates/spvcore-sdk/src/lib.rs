pub mod arc;
pub mod chain;
pub mod datastore;
pub mod draft;
pub mod ef;
pub mod engine;
pub mod error;
pub mod lock;
pub mod merkle_path;
pub mod models;
pub mod paymail;
pub mod record;
pub mod revert;
pub mod sync_task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tokens;
pub mod tx;

// Core types
pub use engine::{Engine, EngineConfig, TxCallback};
pub use error::{CompensationOutcome, Error, Result};
pub use tx::Tx;

// Chain service
pub use arc::{ArcCallback, ArcConfig, ArcService};
pub use chain::{
    Broadcaster, ChainError, ChainOracle, QueryOptions, RequiredLevel, TxInfo, TxStatus,
};
pub use merkle_path::MerklePath;

// Persistence
pub use datastore::Datastore;
pub use lock::{LockGuard, Locker, MemoryLocker};
pub use models::{
    Destination, DraftStatus, DraftTransaction, FeeUnit, Metadata, PaymailP4, ResolutionType,
    SyncConfig, SyncStatus, SyncTransaction, Transaction, TransactionConfig, TransactionStatus,
    TxInputRef, TxOutputConfig, Utxo, Xpub,
};

// Recording and reconciliation
pub use record::{InternalIncomingTx, OutgoingTx, RawIncomingTx, RecordStrategy};
pub use sync_task::{SyncReport, SyncTask, SyncTaskConfig};

// External notifications
pub use paymail::{PaymailNotifier, PaymailP2pClient, paymail_pki};
pub use tokens::{TokenOverlayClient, TokenVerifier};
