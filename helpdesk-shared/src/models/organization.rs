//! Organization (tenant) model and database operations
//!
//! An organization owns its users, invitations, tickets and subscriptions.
//! It also carries two denormalized pointers that the billing code keeps in
//! step with the subscription table:
//!
//! - `subscription_plan_id`: the plan the organization currently enjoys
//! - `current_subscription_id`: the subscription row lifecycle operations act on
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE organizations (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     name VARCHAR(64) NOT NULL,
//!     domain VARCHAR(120) NOT NULL UNIQUE,
//!     subscription_plan_id UUID REFERENCES subscription_plans(id),
//!     current_subscription_id UUID REFERENCES subscriptions(id) ON DELETE SET NULL,
//!     stripe_customer_id VARCHAR(100),
//!     stripe_subscription_id VARCHAR(100),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::models::organization::{CreateOrganization, Organization};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! let org = Organization::create(&pool, CreateOrganization {
//!     name: "Acme".to_string(),
//!     domain: "acme.com".to_string(),
//! }).await?;
//!
//! assert!(Organization::find_by_domain(&pool, "acme.com").await?.is_some());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Organization model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Unique email domain, e.g. `acme.com`
    pub domain: String,

    /// Plan currently in effect
    pub subscription_plan_id: Option<Uuid>,

    /// Subscription that lifecycle operations act on
    pub current_subscription_id: Option<Uuid>,

    /// Payment processor customer ID (set by checkout webhook)
    pub stripe_customer_id: Option<String>,

    /// Payment processor subscription ID
    pub stripe_subscription_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    pub domain: String,
}

const ORG_COLUMNS: &str = "id, name, domain, subscription_plan_id, current_subscription_id, \
                           stripe_customer_id, stripe_subscription_id, created_at, updated_at";

/// Lowercases and trims a domain so lookups and the unique constraint agree
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('@').to_lowercase()
}

impl Organization {
    /// Creates an organization with no plan or subscription yet
    ///
    /// # Errors
    ///
    /// Returns a unique-constraint error (`organizations_domain_key`) if the
    /// domain is already registered.
    pub async fn create<'e, E>(executor: E, data: CreateOrganization) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Organization>(&format!(
            "INSERT INTO organizations (name, domain)
             VALUES ($1, $2)
             RETURNING {ORG_COLUMNS}"
        ))
        .bind(data.name.trim())
        .bind(normalize_domain(&data.domain))
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_domain<'e, E>(executor: E, domain: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE domain = $1"
        ))
        .bind(normalize_domain(domain))
        .fetch_optional(executor)
        .await
    }

    /// Looks up the organization linked to a payment processor customer
    pub async fn find_by_stripe_customer<'e, E>(
        executor: E,
        customer_id: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE stripe_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(executor)
        .await
    }

    /// Points the organization at a new plan and subscription
    pub async fn set_current_subscription<'e, E>(
        executor: E,
        id: Uuid,
        plan_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE organizations
             SET subscription_plan_id = $2,
                 current_subscription_id = $3,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(plan_id)
        .bind(subscription_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records payment processor identifiers
    ///
    /// `None` leaves the stored value untouched.
    pub async fn set_stripe_ids<'e, E>(
        executor: E,
        id: Uuid,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE organizations
             SET stripe_customer_id = COALESCE($2, stripe_customer_id),
                 stripe_subscription_id = COALESCE($3, stripe_subscription_id),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(customer_id)
        .bind(subscription_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an organization and everything it owns
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  Acme.COM "), "acme.com");
        assert_eq!(normalize_domain("@acme.com"), "acme.com");
    }
}
