//! Observer errors

use cbb_concurrency::WorkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Subscription source error: {0}")]
    Source(String),
    #[error("Movement check failed: {0}")]
    Check(String),
    #[error("Invalid subscription data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
