//! Subscription plan catalog
//!
//! Plans are seeded by migration and never written by the application.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE subscription_plans (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     name VARCHAR(64) NOT NULL UNIQUE,
//!     price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
//!     team_size_limit INTEGER NOT NULL CHECK (team_size_limit > 0),
//!     description VARCHAR(256),
//!     features JSONB NOT NULL DEFAULT '[]',
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgExecutor;
use uuid::Uuid;

/// Name of the plan every organization starts on and falls back to
pub const FREE_PLAN_NAME: &str = "Free";

/// A priced tier with a seat limit
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,

    /// Unique display name ("Free", "Professional", "Enterprise")
    pub name: String,

    /// Monthly price in US cents
    pub price_cents: i64,

    /// Maximum number of members an organization on this plan may have
    pub team_size_limit: i32,

    pub description: Option<String>,

    /// Marketing feature bullets
    pub features: Json<Vec<String>>,

    /// Inactive plans are hidden from the catalog
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    /// Whole dollars, as shown in the catalog
    pub fn price_dollars(&self) -> f64 {
        self.price_cents as f64 / 100.0
    }

    /// Whether `members` users fit into this plan
    pub fn allows_members(&self, members: i64) -> bool {
        members <= i64::from(self.team_size_limit)
    }

    /// Lists active plans, cheapest first
    pub async fn list_active<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Plan>(
            "SELECT id, name, price_cents, team_size_limit, description, features, is_active, created_at
             FROM subscription_plans
             WHERE is_active = TRUE
             ORDER BY price_cents ASC, name ASC",
        )
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Plan>(
            "SELECT id, name, price_cents, team_size_limit, description, features, is_active, created_at
             FROM subscription_plans
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_name<'e, E>(executor: E, name: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Plan>(
            "SELECT id, name, price_cents, team_size_limit, description, features, is_active, created_at
             FROM subscription_plans
             WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(executor)
        .await
    }

    /// The default plan new organizations are placed on
    pub async fn find_free<'e, E>(executor: E) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        Self::find_by_name(executor, FREE_PLAN_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(price_cents: i64, team_size_limit: i32) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Professional".to_string(),
            price_cents,
            team_size_limit,
            description: None,
            features: Json(vec!["Priority support".to_string()]),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_price_dollars() {
        assert_eq!(plan(1500, 25).price_dollars(), 15.0);
        assert!(plan(0, 5).is_free());
        assert!(!plan(1500, 25).is_free());
    }

    #[test]
    fn test_allows_members_is_inclusive() {
        let free = plan(0, 5);
        assert!(free.allows_members(5));
        assert!(!free.allows_members(6));
    }

    #[test]
    fn test_features_serialize_as_plain_array() {
        let json = serde_json::to_value(plan(1500, 25)).unwrap();
        assert_eq!(json["features"], serde_json::json!(["Priority support"]));
    }
}
