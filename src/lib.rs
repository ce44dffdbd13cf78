pub mod callback;
pub mod config;
pub mod logging;
pub mod service;

pub use callback::{CallbackError, CallbackHandler};
pub use config::AppConfig;
pub use service::{Node, NodeError};

pub type Result<T> = std::result::Result<T, NodeError>;
