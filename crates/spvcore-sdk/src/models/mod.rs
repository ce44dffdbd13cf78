mod destination;
mod draft;
mod sync_tx;
mod transaction;
mod utxo;
mod xpub;

use std::collections::BTreeMap;

pub use destination::Destination;
pub use draft::{
    DraftStatus, DraftTransaction, FeeUnit, PaymailP4, SyncConfig, TransactionConfig, TxInputRef,
    TxOutputConfig, ResolutionType,
};
pub use sync_tx::{SyncStatus, SyncTransaction};
pub use transaction::{
    META_REVERT_BALANCE_APPLIED, META_XPUB_IN_IDS, META_XPUB_OUT_IDS, META_XPUB_OUTPUT_VALUE,
    REVERTED_SENTINEL, Transaction, TransactionStatus,
};
pub use utxo::{DELETED_SPENDING_TX_ID, Utxo};
pub use xpub::{Xpub, xpub_id};

/// Free-form key/value annotations carried by drafts and transactions.
pub type Metadata = BTreeMap<String, serde_json::Value>;
