use thiserror::Error;

use otvet_core::ports::StorageError;

pub mod conversation;
pub mod event_ledger;

pub use conversation::SqlConversationStore;
pub use event_ledger::SqlEventLedger;

/// Failure inside a SQL repository. Converted into the port-level
/// `StorageError` at the trait boundary.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StorageError {
    fn from(error: RepositoryError) -> Self {
        StorageError(error.to_string())
    }
}
