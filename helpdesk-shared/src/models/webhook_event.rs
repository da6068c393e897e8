//! Ledger of processed payment provider events
//!
//! The provider retries deliveries, so the same event ID can arrive more
//! than once. [`ProcessedWebhookEvent::claim`] is called inside the
//! reconciliation transaction: if the reconciliation rolls back, so does
//! the claim, and the retry gets processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedWebhookEvent {
    pub id: Uuid,

    /// Provider event ID (`evt_...`)
    pub event_id: String,

    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedWebhookEvent {
    /// Records an event as processed
    ///
    /// Returns `false` if the event was already in the ledger.
    pub async fn claim<'e, E>(executor: E, event_id: &str, event_type: &str) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO processed_webhook_events (event_id, event_type)
             VALUES ($1, $2)
             ON CONFLICT (event_id) DO NOTHING
             RETURNING id",
        )
        .bind(event_id)
        .bind(event_type)
        .fetch_optional(executor)
        .await?;

        Ok(inserted.is_some())
    }

    pub async fn find_by_event_id<'e, E>(
        executor: E,
        event_id: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, ProcessedWebhookEvent>(
            "SELECT id, event_id, event_type, processed_at
             FROM processed_webhook_events
             WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(executor)
        .await
    }
}
