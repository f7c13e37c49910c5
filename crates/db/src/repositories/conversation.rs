use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use otvet_core::domain::dialog::{DialogRecord, ReplyStatus};
use otvet_core::domain::message::StoredMessage;
use otvet_core::ports::{ConversationStore, StorageError};

use super::RepositoryError;
use crate::DbPool;

/// Conversation log and dialog history over the `messages` and
/// `dialog_records` tables. Both are append-only; timestamps are stored as
/// RFC 3339 text and `sources` as a JSON array.
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn append(&self, message: StoredMessage) -> Result<(), StorageError> {
        // The partial unique index on external_message_id absorbs platform
        // redeliveries of the same message.
        sqlx::query(
            "INSERT OR IGNORE INTO messages
                 (conversation_id, external_message_id, sender_id, text,
                  is_self_authored, product_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&message.conversation_id)
        .bind(&message.external_message_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.is_self_authored)
        .bind(&message.product_id)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn recent_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = sqlx::query(
            "SELECT conversation_id, external_message_id, sender_id, text,
                    is_self_authored, product_id, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut messages = rows
            .into_iter()
            .map(|row| {
                Ok(StoredMessage {
                    conversation_id: row.get("conversation_id"),
                    external_message_id: row.get("external_message_id"),
                    sender_id: row.get("sender_id"),
                    text: row.get("text"),
                    is_self_authored: row.get("is_self_authored"),
                    product_id: row.get("product_id"),
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        // Newest-first from the index, oldest-first for the caller.
        messages.reverse();
        Ok(messages)
    }

    async fn append_dialog_record(&self, record: DialogRecord) -> Result<(), StorageError> {
        let sources = serde_json::to_string(&record.sources)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        sqlx::query(
            "INSERT INTO dialog_records
                 (conversation_id, product_id, question, answer, status, sources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&record.conversation_id)
        .bind(&record.product_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(record.status.as_str())
        .bind(sources)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }
}

impl SqlConversationStore {
    /// Dialog history for a conversation, newest first. Used by operational
    /// tooling rather than the response cycle itself.
    pub async fn dialog_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<DialogRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT conversation_id, product_id, question, answer, status, sources, created_at
             FROM dialog_records
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let records = rows
            .into_iter()
            .map(|row| {
                let status: String = row.get("status");
                let status = ReplyStatus::parse(&status).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown reply status {status:?}"))
                })?;
                let sources: String = row.get("sources");
                Ok(DialogRecord {
                    conversation_id: row.get("conversation_id"),
                    product_id: row.get("product_id"),
                    question: row.get("question"),
                    answer: row.get("answer"),
                    status,
                    sources: serde_json::from_str(&sources)
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(records)
    }
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp {raw:?}: {e}")))
}
