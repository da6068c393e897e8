//! Replies posted on a ticket

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Response with its author's name and role, as shown on the ticket page
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketResponseView {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub author: Option<String>,
    pub author_is_staff: bool,
}

impl TicketResponse {
    pub async fn create<'e, E>(
        executor: E,
        ticket_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketResponse>(
            "INSERT INTO ticket_responses (ticket_id, user_id, content)
             VALUES ($1, $2, $3)
             RETURNING id, ticket_id, user_id, content, created_at",
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(executor)
        .await
    }

    /// Responses of a ticket in posting order
    pub async fn list_for_ticket<'e, E>(
        executor: E,
        ticket_id: Uuid,
    ) -> Result<Vec<TicketResponseView>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketResponseView>(
            "SELECT r.id, r.content, r.created_at, r.user_id,
                    u.username AS author,
                    COALESCE(u.role IN ('staff', 'admin'), FALSE) AS author_is_staff
             FROM ticket_responses r
             LEFT JOIN users u ON u.id = r.user_id
             WHERE r.ticket_id = $1
             ORDER BY r.created_at ASC, r.id ASC",
        )
        .bind(ticket_id)
        .fetch_all(executor)
        .await
    }
}
