//! Subscription model and database operations
//!
//! A subscription ties an organization to a plan for a period of time.
//! Rows are never updated in place to change plans; a plan change ends one
//! row and starts (or schedules) another, so the table doubles as the
//! organization's billing history.
//!
//! # State machine
//!
//! ```text
//!             upgrade                       activation
//! active ──────────────► cancelled ─────────────────────► expired
//!   │  ▲                    │  ▲
//!   │  └── reactivate ──────┘  │ cancel
//!   │                          │
//!   └── downgrade ──► scheduled_downgrade ──► expired (activation)
//!          ▲                  │
//!          └─ revert ─────────┘
//!
//! scheduled ──► active (activation, once start_date has passed)
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE subscriptions (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
//!     plan_id UUID NOT NULL REFERENCES subscription_plans(id),
//!     status subscription_status NOT NULL,
//!     start_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     end_date TIMESTAMPTZ,
//!     last_billing_date TIMESTAMPTZ,
//!     next_billing_date TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE UNIQUE INDEX subscriptions_one_active_per_org
//!     ON subscriptions(organization_id) WHERE status = 'active';
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Lifecycle state of a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In effect; at most one per organization
    Active,

    /// Ended, or ending at `end_date` with a replacement queued
    Cancelled,

    /// Queued to become active at `start_date`
    Scheduled,

    /// Still in effect until `end_date`, then replaced by a cheaper plan
    ScheduledDowngrade,

    /// Superseded by a later subscription
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Scheduled => "scheduled",
            SubscriptionStatus::ScheduledDowngrade => "scheduled_downgrade",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,

    /// When the subscription takes (or took) effect
    pub start_date: DateTime<Utc>,

    /// When the subscription stops being in effect, if known
    pub end_date: Option<DateTime<Utc>>,

    pub last_billing_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a subscription row
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_billing_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, organization_id, plan_id, status, start_date, end_date, \
                                    last_billing_date, next_billing_date, created_at, updated_at";

impl Subscription {
    /// Inserts a subscription row
    ///
    /// # Errors
    ///
    /// Inserting a second `active` row for an organization violates
    /// `subscriptions_one_active_per_org`.
    pub async fn insert<'e, E>(executor: E, data: NewSubscription) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions
                (organization_id, plan_id, status, start_date, end_date, last_billing_date, next_billing_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(data.organization_id)
        .bind(data.plan_id)
        .bind(data.status)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.last_billing_date)
        .bind(data.next_billing_date)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// The subscription the organization's `current_subscription_id` points at
    pub async fn find_current<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(
            "SELECT s.id, s.organization_id, s.plan_id, s.status, s.start_date, s.end_date,
                    s.last_billing_date, s.next_billing_date, s.created_at, s.updated_at
             FROM organizations o
             JOIN subscriptions s ON s.id = o.current_subscription_id
             WHERE o.id = $1",
        )
        .bind(organization_id)
        .fetch_optional(executor)
        .await
    }

    /// The single `active` row of an organization, if any
    pub async fn find_active<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE organization_id = $1 AND status = 'active'"
        ))
        .bind(organization_id)
        .fetch_optional(executor)
        .await
    }

    /// The queued future subscription of an organization, if any
    pub async fn find_scheduled<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE organization_id = $1 AND status = 'scheduled'
             ORDER BY start_date ASC
             LIMIT 1"
        ))
        .bind(organization_id)
        .fetch_optional(executor)
        .await
    }

    /// Full billing history of an organization, newest first
    pub async fn list_by_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE organization_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .fetch_all(executor)
        .await
    }

    /// Moves a row to a new status and sets its end date
    pub async fn set_status<'e, E>(
        executor: E,
        id: Uuid,
        status: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET status = $2, end_date = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(end_date)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Turns a queued row into the active one
    pub async fn activate<'e, E>(
        executor: E,
        id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET status = 'active',
                 end_date = NULL,
                 last_billing_date = start_date,
                 next_billing_date = $2,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_billing_date)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves the next billing date, e.g. to the processor's period end
    pub async fn set_next_billing_date<'e, E>(
        executor: E,
        id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET next_billing_date = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_billing_date)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Ends every row still in effect (`active` or `scheduled_downgrade`)
    pub async fn end_live<'e, E>(
        executor: E,
        organization_id: Uuid,
        end_date: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET status = 'cancelled', end_date = $2, updated_at = NOW()
             WHERE organization_id = $1 AND status IN ('active', 'scheduled_downgrade')",
        )
        .bind(organization_id)
        .bind(end_date)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Drops every queued row of an organization
    pub async fn delete_scheduled<'e, E>(executor: E, organization_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "DELETE FROM subscriptions WHERE organization_id = $1 AND status = 'scheduled'",
        )
        .bind(organization_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Organizations that have a queued row whose start date has passed
    pub async fn organizations_with_due_schedules<'e, E>(
        executor: E,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "SELECT organization_id FROM subscriptions
             WHERE status = 'scheduled' AND start_date <= $1
             GROUP BY organization_id
             ORDER BY MIN(start_date) ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Whether the row is still in effect for seat and plan purposes
    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::ScheduledDowngrade
        )
    }
}
