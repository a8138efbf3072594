//! Node-level errors.
use thiserror::Error;

use cairn_core::error::{ChainError, MempoolError, StorageError};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Storage(#[from] StorageError),
    #[error("config: {0}")] Config(#[from] config::ConfigError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("{0} service has stopped")] ServiceStopped(&'static str),
}
