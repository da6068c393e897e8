//! Notes on a ticket
//!
//! Internal comments are written by staff for staff and never leave the
//! support team.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Option<Uuid>,
    pub content: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketCommentView {
    pub id: Uuid,
    pub content: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub author: Option<String>,
}

impl TicketComment {
    pub async fn create<'e, E>(
        executor: E,
        ticket_id: Uuid,
        user_id: Uuid,
        content: &str,
        is_internal: bool,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketComment>(
            "INSERT INTO ticket_comments (ticket_id, user_id, content, is_internal)
             VALUES ($1, $2, $3, $4)
             RETURNING id, ticket_id, user_id, content, is_internal, created_at",
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(content)
        .bind(is_internal)
        .fetch_one(executor)
        .await
    }

    /// Comments of a ticket in posting order
    ///
    /// Internal comments are only returned when `include_internal` is set.
    pub async fn list_for_ticket<'e, E>(
        executor: E,
        ticket_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<TicketCommentView>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketCommentView>(
            "SELECT c.id, c.content, c.is_internal, c.created_at, c.user_id, u.username AS author
             FROM ticket_comments c
             LEFT JOIN users u ON u.id = c.user_id
             WHERE c.ticket_id = $1 AND ($2 OR c.is_internal = FALSE)
             ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(ticket_id)
        .bind(include_internal)
        .fetch_all(executor)
        .await
    }
}
