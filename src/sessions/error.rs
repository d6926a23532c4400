use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session store error: {0}")]
    Store(#[from] CacheError),

    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
}
