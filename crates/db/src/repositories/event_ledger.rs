use async_trait::async_trait;
use chrono::Utc;

use otvet_core::ports::{EventLedger, MarkOutcome, StorageError};

use super::RepositoryError;
use crate::DbPool;

/// Ledger of processed webhook event ids backed by the `processed_events`
/// table. The claim is a single conditional insert, so two racing cycles
/// for the same event id resolve inside SQLite.
pub struct SqlEventLedger {
    pool: DbPool,
}

impl SqlEventLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for SqlEventLedger {
    async fn has_been_processed(&self, event_id: &str) -> Result<bool, StorageError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM processed_events WHERE event_id = ?1",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(found > 0)
    }

    async fn mark_processed(&self, event_id: &str) -> Result<MarkOutcome, StorageError> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, processed_at) VALUES (?1, ?2)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 1 {
            Ok(MarkOutcome::Marked)
        } else {
            Ok(MarkOutcome::AlreadyMarked)
        }
    }
}
