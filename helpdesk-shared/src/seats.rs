//! Seat limits per subscription plan
//!
//! Every plan caps how many members an organization may have. The cap is
//! checked before a plan change is allowed and enforced whenever the
//! organization management view loads: members over the cap are moved out
//! of the organization, newest account first, never touching admins.
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::seats::enforce_seat_limit;
//! use sqlx::PgPool;
//! use uuid::Uuid;
//!
//! # async fn example(pool: PgPool, org_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = enforce_seat_limit(&pool, org_id).await?;
//! if !outcome.evicted.is_empty() {
//!     println!("{} members exceeded the plan limit", outcome.evicted.len());
//! }
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::lock::{lock_for_transaction, LockScope};
use crate::models::organization::Organization;
use crate::models::plan::Plan;
use crate::models::user::{Role, User};

#[derive(Debug, thiserror::Error)]
pub enum SeatError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    #[error("Organization {0} has no subscription plan")]
    NoPlan(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Seat usage of an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatUsage {
    pub limit: i64,
    pub used: i64,
}

impl SeatUsage {
    pub fn remaining(&self) -> i64 {
        (self.limit - self.used).max(0)
    }
}

/// Result of an enforcement pass
#[derive(Debug, Clone, Serialize)]
pub struct SeatEnforcement {
    pub limit: i64,

    /// Users moved out of the organization
    pub evicted: Vec<Uuid>,
}

/// Picks which members to evict so that at most `limit` remain
///
/// `members` must be ordered newest first. Admins are skipped, so the
/// result can be shorter than the excess when admins alone exceed the limit.
pub fn select_evictions(members: &[User], limit: usize) -> Vec<Uuid> {
    let excess = members.len().saturating_sub(limit);

    members
        .iter()
        .filter(|m| m.role != Role::Admin)
        .take(excess)
        .map(|m| m.id)
        .collect()
}

/// Evicts members above the plan limit
///
/// Runs under the organization's subscription lock so it cannot interleave
/// with a plan change. Organizations without a plan are left alone.
pub async fn enforce_seat_limit(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<SeatEnforcement, SeatError> {
    let mut tx = pool.begin().await?;
    lock_for_transaction(&mut *tx, LockScope::Subscription(organization_id)).await?;

    let org = Organization::find_by_id(&mut *tx, organization_id)
        .await?
        .ok_or(SeatError::OrganizationNotFound(organization_id))?;

    let plan = match org.subscription_plan_id {
        Some(plan_id) => Plan::find_by_id(&mut *tx, plan_id).await?,
        None => None,
    };
    let Some(plan) = plan else {
        tx.rollback().await?;
        return Ok(SeatEnforcement { limit: 0, evicted: Vec::new() });
    };

    let limit = usize::try_from(plan.team_size_limit).unwrap_or(0);
    let members = User::list_by_organization(&mut *tx, organization_id).await?;
    let evicted = select_evictions(&members, limit);

    if !evicted.is_empty() {
        User::leave_organization(&mut *tx, &evicted).await?;
        tracing::warn!(
            organization_id = %organization_id,
            plan = %plan.name,
            limit = plan.team_size_limit,
            evicted = evicted.len(),
            "Members removed for exceeding the plan's seat limit"
        );
    }

    tx.commit().await?;

    Ok(SeatEnforcement {
        limit: i64::from(plan.team_size_limit),
        evicted,
    })
}
