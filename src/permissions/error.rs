use thiserror::Error;

use crate::database::DatabaseError;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Unknown permission key: {0}")]
    UnknownPermission(String),

    #[error("Invalid permission context: {0}")]
    InvalidContext(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Group not found: {0}")]
    GroupNotFound(uuid::Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}
