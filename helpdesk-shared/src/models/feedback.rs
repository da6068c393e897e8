//! Cancellation feedback

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Why an organization cancelled, captured on the cancel form
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionFeedback {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub reason: String,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionFeedback {
    pub async fn create<'e, E>(
        executor: E,
        organization_id: Uuid,
        reason: &str,
        feedback: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, SubscriptionFeedback>(
            "INSERT INTO subscription_feedback (organization_id, reason, feedback)
             VALUES ($1, $2, $3)
             RETURNING id, organization_id, reason, feedback, created_at",
        )
        .bind(organization_id)
        .bind(reason)
        .bind(feedback)
        .fetch_one(executor)
        .await
    }

    pub async fn list_by_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, SubscriptionFeedback>(
            "SELECT id, organization_id, reason, feedback, created_at
             FROM subscription_feedback
             WHERE organization_id = $1
             ORDER BY created_at DESC",
        )
        .bind(organization_id)
        .fetch_all(executor)
        .await
    }
}
