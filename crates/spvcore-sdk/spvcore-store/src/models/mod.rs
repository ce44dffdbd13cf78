pub mod destination;
pub mod draft;
pub mod sync_tx;
pub mod transaction;
pub mod utxo;
pub mod xpub;

pub use destination::DestinationRow;
pub use draft::DraftRow;
pub use sync_tx::SyncTransactionRow;
pub use transaction::TransactionRow;
pub use utxo::UtxoRow;
pub use xpub::XpubRow;
