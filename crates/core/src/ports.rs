//! Trait seams the responder coordinates over. Platform crates provide the
//! real implementations; `testing` provides in-memory doubles.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::dialog::{DialogRecord, ReplyStatus};
use crate::domain::message::StoredMessage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

/// Result of an atomic idempotency mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyMarked,
}

/// Append-only registry of handled event ids. Marking must be atomic with
/// respect to concurrent callers for the same id: exactly one caller
/// observes `Marked`, every other observes `AlreadyMarked`.
#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn has_been_processed(&self, event_id: &str) -> Result<bool, StorageError>;
    async fn mark_processed(&self, event_id: &str) -> Result<MarkOutcome, StorageError>;
}

/// Durable, append-only conversation log plus write-once dialog records.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Duplicate `external_message_id`s are tolerated silently; the ledger
    /// is the idempotence authority, not this log.
    async fn append(&self, message: StoredMessage) -> Result<(), StorageError>;

    /// The `limit` most-recent messages for the conversation, oldest first
    /// (`created_at`, insertion order on ties). Unknown conversations yield
    /// an empty sequence, never an error.
    async fn recent_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    async fn append_dialog_record(&self, record: DialogRecord) -> Result<(), StorageError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessengerError {
    #[error("transient messenger failure: {0}")]
    Transient(String),
    #[error("permanent messenger failure: {0}")]
    Permanent(String),
}

impl MessengerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Outbound surface of the platform messaging API.
#[async_trait]
pub trait MessengerApi: Send + Sync {
    async fn send_message(&self, conversation_id: &str, text: &str)
        -> Result<(), MessengerError>;
    async fn mark_read(&self, conversation_id: &str) -> Result<(), MessengerError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification failure: {0}")]
pub struct NotifierError(pub String);

/// One completed exchange, for the audit side-channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyRecord {
    pub conversation_id: String,
    pub product_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub status: ReplyStatus,
    pub sources: BTreeSet<String>,
}

/// Human hand-off request, enriched with the last reply the bot made in
/// this conversation (if any).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationAlert {
    pub conversation_id: String,
    pub product_id: Option<String>,
    pub customer_message: String,
    pub last_bot_reply: Option<String>,
}

/// Best-effort audit channel. Callers log and swallow failures; a broken
/// notifier must never unwind the reply path.
#[async_trait]
pub trait AuditNotifier: Send + Sync {
    async fn publish_reply(&self, record: &ReplyRecord) -> Result<(), NotifierError>;
    async fn publish_escalation(&self, alert: &EscalationAlert) -> Result<(), NotifierError>;
}

#[cfg(test)]
mod tests {
    use super::MessengerError;

    #[test]
    fn only_transient_messenger_errors_are_retryable() {
        assert!(MessengerError::Transient("timeout".to_string()).is_transient());
        assert!(!MessengerError::Permanent("bad request".to_string()).is_transient());
    }
}
