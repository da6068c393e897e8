//! Ticket model, list filters and dashboard statistics
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE tickets (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
//!     title VARCHAR(100) NOT NULL,
//!     description TEXT NOT NULL,
//!     status ticket_status NOT NULL DEFAULT 'open',
//!     priority ticket_priority NOT NULL DEFAULT 'medium',
//!     category ticket_category NOT NULL DEFAULT 'general',
//!     submitter_id UUID REFERENCES users(id) ON DELETE SET NULL,
//!     assignee_id UUID REFERENCES users(id) ON DELETE SET NULL,
//!     last_updated_by_id UUID REFERENCES users(id) ON DELETE SET NULL,
//!     first_response_at TIMESTAMPTZ,
//!     last_staff_response_at TIMESTAMPTZ,
//!     due_date TIMESTAMPTZ,
//!     ai_suggestion TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Visibility
//!
//! Staff and admins see every ticket of their organization. Plain users see
//! only the tickets they submitted. Every query here takes a
//! [`TicketScope`] so that rule cannot be forgotten at a call site.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use std::str::FromStr;
use uuid::Uuid;

/// Open tickets older than this are overdue
pub const OVERDUE_AFTER_HOURS: i64 = 24;

/// Maximum title length in characters
pub const TITLE_MAX_LEN: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    OnHold,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::OnHold => "on_hold",
            TicketStatus::Closed => "closed",
        }
    }

    /// Bootstrap contextual class used by the front end
    pub fn css_class(&self) -> &'static str {
        match self {
            TicketStatus::Open => "primary",
            TicketStatus::InProgress => "warning",
            TicketStatus::OnHold => "info",
            TicketStatus::Closed => "success",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "on_hold" => Ok(TicketStatus::OnHold),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            TicketPriority::Low => "success",
            TicketPriority::Medium => "warning",
            TicketPriority::High => "danger",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    #[default]
    General,
    Technical,
    Billing,
    FeatureRequest,
    BugReport,
}

/// Ticket row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub category: TicketCategory,
    pub submitter_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,

    /// Last staff member to change or answer the ticket
    pub last_updated_by_id: Option<Uuid>,

    /// Set by the first staff response, never moved afterwards
    pub first_response_at: Option<DateTime<Utc>>,

    pub last_staff_response_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,

    /// Troubleshooting hint generated at creation
    pub ai_suggestion: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a ticket
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub organization_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub category: TicketCategory,
    pub submitter_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub ai_suggestion: Option<String>,
}

/// Who is looking at tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketScope {
    pub organization_id: Uuid,
    pub user_id: Uuid,

    /// Staff see the whole organization, others only their own tickets
    pub is_staff: bool,
}

impl TicketScope {
    /// Whether a ticket is visible in this scope
    pub fn can_view(&self, ticket: &Ticket) -> bool {
        ticket.organization_id == self.organization_id
            && (self.is_staff || ticket.submitter_id == Some(self.user_id))
    }
}

/// Additive list restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketFilter {
    /// Assigned to the viewer
    AssignedToMe,

    /// Priority is `high`
    HighPriority,

    /// Open, with no response from any staff member or admin of the organization
    NeedsResponse,

    /// Open for longer than 24 hours
    Overdue,
}

impl TicketFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketFilter::AssignedToMe => "assigned_to_me",
            TicketFilter::HighPriority => "high_priority",
            TicketFilter::NeedsResponse => "needs_response",
            TicketFilter::Overdue => "overdue",
        }
    }
}

impl FromStr for TicketFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned_to_me" => Ok(TicketFilter::AssignedToMe),
            "high_priority" => Ok(TicketFilter::HighPriority),
            "needs_response" => Ok(TicketFilter::NeedsResponse),
            "overdue" => Ok(TicketFilter::Overdue),
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

/// Parses filter values, accepting comma separated lists
///
/// `["high_priority,overdue", "assigned_to_me"]` yields three filters.
/// Empty fragments are skipped and duplicates collapse.
pub fn parse_filters<'a, I>(values: I) -> Result<Vec<TicketFilter>, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut filters = Vec::new();
    for value in values {
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let filter = TicketFilter::from_str(part)?;
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
    }
    Ok(filters)
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TicketSummaryRow {
    id: Uuid,
    title: String,
    status: TicketStatus,
    priority: TicketPriority,
    created_at: DateTime<Utc>,
    assignee: Option<String>,
}

/// List entry returned by the ticket list and filter endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: Uuid,
    pub title: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub created_at: DateTime<Utc>,
    pub status_class: String,
    pub priority_class: String,

    /// Assignee username
    pub assignee: Option<String>,
}

impl From<TicketSummaryRow> for TicketSummary {
    fn from(row: TicketSummaryRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            status: row.status,
            priority: row.priority,
            created_at: row.created_at,
            status_class: row.status.css_class().to_string(),
            priority_class: row.priority.css_class().to_string(),
            assignee: row.assignee,
        }
    }
}

/// Builds the summary query for a scope and a set of filters
fn summary_query(
    scope: &TicketScope,
    filters: &[TicketFilter],
    now: DateTime<Utc>,
    limit: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT t.id, t.title, t.status, t.priority, t.created_at, a.username AS assignee
         FROM tickets t
         LEFT JOIN users a ON a.id = t.assignee_id
         WHERE t.organization_id = ",
    );
    qb.push_bind(scope.organization_id);

    if !scope.is_staff {
        qb.push(" AND t.submitter_id = ").push_bind(scope.user_id);
    }

    for filter in filters {
        match filter {
            TicketFilter::AssignedToMe => {
                qb.push(" AND t.assignee_id = ").push_bind(scope.user_id);
            }
            TicketFilter::HighPriority => {
                qb.push(" AND t.priority = 'high'");
            }
            TicketFilter::NeedsResponse => {
                qb.push(
                    " AND t.status = 'open' AND NOT EXISTS (
                        SELECT 1 FROM ticket_responses r
                        JOIN users u ON u.id = r.user_id
                        WHERE r.ticket_id = t.id
                          AND u.organization_id = t.organization_id
                          AND u.role IN ('staff', 'admin')
                    )",
                );
            }
            TicketFilter::Overdue => {
                qb.push(" AND t.status = 'open' AND t.created_at <= ")
                    .push_bind(now - Duration::hours(OVERDUE_AFTER_HOURS));
            }
        }
    }

    qb.push(" ORDER BY t.created_at DESC, t.id DESC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    qb
}

/// Ticket counts for the staff dashboard
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct OrganizationTicketCounts {
    pub total: i64,
    pub open: i64,
    pub high_priority: i64,
    pub closed: i64,
    pub resolved_today: i64,

    /// Mean seconds from creation to first staff response
    pub avg_first_response_secs: Option<f64>,
}

/// Ticket counts for a plain user's dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct SubmitterTicketCounts {
    pub open_tickets: i64,
    pub in_progress_tickets: i64,
    pub closed_tickets: i64,
}

const TICKET_COLUMNS: &str = "id, organization_id, title, description, status, priority, category, \
                              submitter_id, assignee_id, last_updated_by_id, first_response_at, \
                              last_staff_response_at, due_date, ai_suggestion, created_at, updated_at";

impl Ticket {
    pub async fn create<'e, E>(executor: E, data: NewTicket) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "INSERT INTO tickets
                (organization_id, title, description, priority, category,
                 submitter_id, assignee_id, due_date, ai_suggestion)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(data.organization_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.priority)
        .bind(data.category)
        .bind(data.submitter_id)
        .bind(data.assignee_id)
        .bind(data.due_date)
        .bind(data.ai_suggestion)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Assignee of the newest ticket in the organization that has one
    pub async fn last_assignee<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "SELECT assignee_id FROM tickets
             WHERE organization_id = $1 AND assignee_id IS NOT NULL
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(organization_id)
        .fetch_optional(executor)
        .await
    }

    /// Visible tickets, newest first, restricted by every filter given
    pub async fn list_summaries<'e, E>(
        executor: E,
        scope: &TicketScope,
        filters: &[TicketFilter],
        now: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<TicketSummary>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let mut qb = summary_query(scope, filters, now, limit);
        let rows = qb
            .build_query_as::<TicketSummaryRow>()
            .fetch_all(executor)
            .await?;

        Ok(rows.into_iter().map(TicketSummary::from).collect())
    }

    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        status: TicketStatus,
        updated_by: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "UPDATE tickets
             SET status = $2, last_updated_by_id = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(updated_by)
        .fetch_optional(executor)
        .await
    }

    /// Stamps response tracking for a staff reply made at `at`
    pub async fn record_staff_response<'e, E>(
        executor: E,
        id: Uuid,
        staff_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE tickets
             SET first_response_at = COALESCE(first_response_at, $3),
                 last_staff_response_at = $3,
                 last_updated_by_id = $2,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(staff_id)
        .bind(at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Aggregates for the staff dashboard
    ///
    /// `day_start` is the beginning of the current UTC day; tickets closed
    /// since then count as resolved today.
    pub async fn organization_counts<'e, E>(
        executor: E,
        organization_id: Uuid,
        day_start: DateTime<Utc>,
    ) -> Result<OrganizationTicketCounts, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OrganizationTicketCounts>(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'open') AS open,
                COUNT(*) FILTER (WHERE priority = 'high') AS high_priority,
                COUNT(*) FILTER (WHERE status = 'closed') AS closed,
                COUNT(*) FILTER (WHERE status = 'closed' AND updated_at >= $2) AS resolved_today,
                (AVG(EXTRACT(EPOCH FROM (first_response_at - created_at)))
                    FILTER (WHERE first_response_at IS NOT NULL))::FLOAT8 AS avg_first_response_secs
             FROM tickets
             WHERE organization_id = $1",
        )
        .bind(organization_id)
        .bind(day_start)
        .fetch_one(executor)
        .await
    }

    /// Status counts of the tickets a user submitted
    pub async fn submitter_counts<'e, E>(
        executor: E,
        organization_id: Uuid,
        submitter_id: Uuid,
    ) -> Result<SubmitterTicketCounts, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, SubmitterTicketCounts>(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'open') AS open_tickets,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress_tickets,
                COUNT(*) FILTER (WHERE status = 'closed') AS closed_tickets
             FROM tickets
             WHERE organization_id = $1 AND submitter_id = $2",
        )
        .bind(organization_id)
        .bind(submitter_id)
        .fetch_one(executor)
        .await
    }

    /// Open longer than the overdue threshold at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Open
            && now - self.created_at > Duration::hours(OVERDUE_AFTER_HOURS)
    }
}
