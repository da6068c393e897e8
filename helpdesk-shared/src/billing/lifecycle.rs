//! Subscription lifecycle
//!
//! Plan changes never edit a subscription's plan in place. An upgrade ends
//! the current row and starts a new active one immediately; a downgrade or
//! cancellation queues a `scheduled` row that the worker activates once the
//! paid period is over.
//!
//! Each operation runs in one transaction holding the organization's
//! subscription lock, so a plan change is applied completely or not at all
//! and concurrent changes cannot leave two `active` rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::billing_period;
use crate::db::lock::{lock_for_transaction, LockScope};
use crate::models::feedback::SubscriptionFeedback;
use crate::models::organization::Organization;
use crate::models::plan::Plan;
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionStatus};
use crate::models::user::User;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Organization not found")]
    OrganizationNotFound,

    #[error("Organization has no current subscription")]
    NoCurrentSubscription,

    #[error("Plan not found")]
    PlanNotFound,

    #[error("The Free plan is missing from the plan catalog")]
    FreePlanMissing,

    #[error("Organization is already on the {0} plan")]
    SamePlan(String),

    #[error("Current subscription is {0}; it must be active")]
    NotActive(SubscriptionStatus),

    #[error("Only a cancelled subscription can be reactivated (current status: {0})")]
    NotCancelled(SubscriptionStatus),

    #[error("There is no scheduled downgrade to revert")]
    NoPendingDowngrade,

    #[error("The Free plan cannot be cancelled")]
    CannotCancelFree,

    #[error(
        "Cannot switch to the {plan} plan. You have {active_users} active users, but the plan only allows {limit}."
    )]
    SeatLimitExceeded {
        plan: String,
        active_users: i64,
        limit: i32,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How a plan change is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Takes effect immediately
    Upgrade,

    /// Takes effect at the end of the current billing period
    Downgrade,
}

/// Same-price moves count as upgrades
pub fn classify_change(current_price_cents: i64, target_price_cents: i64) -> ChangeKind {
    if target_price_cents >= current_price_cents {
        ChangeKind::Upgrade
    } else {
        ChangeKind::Downgrade
    }
}

/// When the current paid period ends
fn period_end(subscription: &Subscription, now: DateTime<Utc>) -> DateTime<Utc> {
    subscription
        .next_billing_date
        .unwrap_or_else(|| now + billing_period())
}

/// Outcome of a plan change
#[derive(Debug, Clone, Serialize)]
pub struct PlanChange {
    pub kind: ChangeKind,
    pub plan: Plan,

    /// The row that was current before the change, as updated
    pub previous: Subscription,

    /// The new active row (upgrade) or the queued row (downgrade)
    pub subscription: Subscription,
}

/// Outcome of a cancellation
#[derive(Debug, Clone, Serialize)]
pub struct Cancellation {
    pub subscription: Subscription,

    /// Free-plan row queued to start when the paid period ends
    pub scheduled: Subscription,
}

/// Current billing state shown on the subscription page
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub subscription: Option<Subscription>,
    pub plan: Option<Plan>,
    pub scheduled: Option<Subscription>,
    pub scheduled_plan: Option<Plan>,
    pub history: Vec<Subscription>,
}

/// Opens a transaction holding the organization's subscription lock
async fn begin_locked(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Transaction<'static, Postgres>, LifecycleError> {
    let mut tx = pool.begin().await?;
    lock_for_transaction(&mut *tx, LockScope::Subscription(organization_id)).await?;
    Ok(tx)
}

async fn current_subscription(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
) -> Result<Subscription, LifecycleError> {
    if Organization::find_by_id(&mut **tx, organization_id)
        .await?
        .is_none()
    {
        return Err(LifecycleError::OrganizationNotFound);
    }

    Subscription::find_current(&mut **tx, organization_id)
        .await?
        .ok_or(LifecycleError::NoCurrentSubscription)
}

async fn load_plan(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
) -> Result<Plan, LifecycleError> {
    Plan::find_by_id(&mut **tx, plan_id)
        .await?
        .ok_or(LifecycleError::PlanNotFound)
}

/// Switches the organization to `target_plan_id`
///
/// Upgrades (target price at least the current price) take effect now.
/// Downgrades mark the current row `scheduled_downgrade` and queue the new
/// plan for the end of the billing period, leaving the organization's plan
/// pointers untouched until then.
pub async fn change_plan(
    pool: &PgPool,
    organization_id: Uuid,
    target_plan_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PlanChange, LifecycleError> {
    let mut tx = begin_locked(pool, organization_id).await?;

    let current = current_subscription(&mut tx, organization_id).await?;
    if current.status != SubscriptionStatus::Active {
        return Err(LifecycleError::NotActive(current.status));
    }

    let target = load_plan(&mut tx, target_plan_id).await?;
    if !target.is_active {
        return Err(LifecycleError::PlanNotFound);
    }
    if target.id == current.plan_id {
        return Err(LifecycleError::SamePlan(target.name));
    }

    let active_users = User::count_active_by_organization(&mut *tx, organization_id).await?;
    if !target.allows_members(active_users) {
        return Err(LifecycleError::SeatLimitExceeded {
            plan: target.name,
            active_users,
            limit: target.team_size_limit,
        });
    }

    let current_plan = load_plan(&mut tx, current.plan_id).await?;
    let kind = classify_change(current_plan.price_cents, target.price_cents);

    let (previous, subscription) = match kind {
        ChangeKind::Upgrade => {
            Subscription::set_status(&mut *tx, current.id, SubscriptionStatus::Cancelled, Some(now))
                .await?;

            let subscription = Subscription::insert(
                &mut *tx,
                NewSubscription {
                    organization_id,
                    plan_id: target.id,
                    status: SubscriptionStatus::Active,
                    start_date: now,
                    end_date: None,
                    last_billing_date: Some(now),
                    next_billing_date: Some(now + billing_period()),
                },
            )
            .await?;

            Organization::set_current_subscription(
                &mut *tx,
                organization_id,
                target.id,
                subscription.id,
            )
            .await?;

            let previous = Subscription {
                status: SubscriptionStatus::Cancelled,
                end_date: Some(now),
                ..current
            };
            (previous, subscription)
        }
        ChangeKind::Downgrade => {
            let switch_at = period_end(&current, now);

            Subscription::set_status(
                &mut *tx,
                current.id,
                SubscriptionStatus::ScheduledDowngrade,
                Some(switch_at),
            )
            .await?;
            Subscription::delete_scheduled(&mut *tx, organization_id).await?;

            let subscription = Subscription::insert(
                &mut *tx,
                NewSubscription {
                    organization_id,
                    plan_id: target.id,
                    status: SubscriptionStatus::Scheduled,
                    start_date: switch_at,
                    end_date: None,
                    last_billing_date: None,
                    next_billing_date: None,
                },
            )
            .await?;

            let previous = Subscription {
                status: SubscriptionStatus::ScheduledDowngrade,
                end_date: Some(switch_at),
                ..current
            };
            (previous, subscription)
        }
    };

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        from_plan = %current_plan.name,
        to_plan = %target.name,
        kind = ?kind,
        "Subscription plan changed"
    );

    Ok(PlanChange {
        kind,
        plan: target,
        previous,
        subscription,
    })
}

/// Cancels the paid subscription at the end of its billing period
///
/// A Free-plan row is queued to take over. `reason` and `feedback` are
/// stored when a reason is given.
pub async fn cancel(
    pool: &PgPool,
    organization_id: Uuid,
    reason: Option<&str>,
    feedback: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Cancellation, LifecycleError> {
    let mut tx = begin_locked(pool, organization_id).await?;

    let current = current_subscription(&mut tx, organization_id).await?;
    if current.status != SubscriptionStatus::Active {
        return Err(LifecycleError::NotActive(current.status));
    }

    let plan = load_plan(&mut tx, current.plan_id).await?;
    if plan.is_free() {
        return Err(LifecycleError::CannotCancelFree);
    }

    let free = Plan::find_free(&mut *tx)
        .await?
        .ok_or(LifecycleError::FreePlanMissing)?;

    let ends_at = period_end(&current, now);
    Subscription::set_status(&mut *tx, current.id, SubscriptionStatus::Cancelled, Some(ends_at))
        .await?;
    Subscription::delete_scheduled(&mut *tx, organization_id).await?;

    let scheduled = Subscription::insert(
        &mut *tx,
        NewSubscription {
            organization_id,
            plan_id: free.id,
            status: SubscriptionStatus::Scheduled,
            start_date: ends_at,
            end_date: None,
            last_billing_date: None,
            next_billing_date: None,
        },
    )
    .await?;

    if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
        SubscriptionFeedback::create(&mut *tx, organization_id, reason, feedback.unwrap_or(""))
            .await?;
    }

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        plan = %plan.name,
        ends_at = %ends_at,
        "Subscription cancelled"
    );

    Ok(Cancellation {
        subscription: Subscription {
            status: SubscriptionStatus::Cancelled,
            end_date: Some(ends_at),
            ..current
        },
        scheduled,
    })
}

/// Undoes a cancellation before it takes effect
pub async fn reactivate(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Subscription, LifecycleError> {
    let mut tx = begin_locked(pool, organization_id).await?;

    let current = current_subscription(&mut tx, organization_id).await?;
    if current.status != SubscriptionStatus::Cancelled {
        return Err(LifecycleError::NotCancelled(current.status));
    }

    Subscription::delete_scheduled(&mut *tx, organization_id).await?;
    Subscription::set_status(&mut *tx, current.id, SubscriptionStatus::Active, None).await?;

    tx.commit().await?;

    tracing::info!(organization_id = %organization_id, "Subscription reactivated");

    Ok(Subscription {
        status: SubscriptionStatus::Active,
        end_date: None,
        ..current
    })
}

/// Drops a pending downgrade and keeps the current plan
pub async fn revert_downgrade(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Subscription, LifecycleError> {
    let mut tx = begin_locked(pool, organization_id).await?;

    let current = current_subscription(&mut tx, organization_id).await?;
    if current.status != SubscriptionStatus::ScheduledDowngrade {
        return Err(LifecycleError::NoPendingDowngrade);
    }

    Subscription::delete_scheduled(&mut *tx, organization_id).await?;
    Subscription::set_status(&mut *tx, current.id, SubscriptionStatus::Active, None).await?;

    tx.commit().await?;

    tracing::info!(organization_id = %organization_id, "Scheduled downgrade reverted");

    Ok(Subscription {
        status: SubscriptionStatus::Active,
        end_date: None,
        ..current
    })
}

/// Activates the organization's queued subscription if its start has passed
///
/// The previous current row becomes `expired`. Returns the newly active row,
/// or `None` when nothing was due.
pub async fn activate_scheduled(
    pool: &PgPool,
    organization_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Subscription>, LifecycleError> {
    let mut tx = begin_locked(pool, organization_id).await?;

    let Some(scheduled) = Subscription::find_scheduled(&mut *tx, organization_id).await? else {
        return Ok(None);
    };
    if scheduled.start_date > now {
        return Ok(None);
    }

    if let Some(previous) = Subscription::find_current(&mut *tx, organization_id).await? {
        if previous.status != SubscriptionStatus::Expired {
            let ended = previous.end_date.unwrap_or(scheduled.start_date);
            Subscription::set_status(
                &mut *tx,
                previous.id,
                SubscriptionStatus::Expired,
                Some(ended),
            )
            .await?;
        }
    }

    let next_billing = scheduled.start_date + billing_period();
    Subscription::activate(&mut *tx, scheduled.id, next_billing).await?;
    Organization::set_current_subscription(
        &mut *tx,
        organization_id,
        scheduled.plan_id,
        scheduled.id,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        subscription_id = %scheduled.id,
        plan_id = %scheduled.plan_id,
        "Scheduled subscription activated"
    );

    Ok(Some(Subscription {
        status: SubscriptionStatus::Active,
        end_date: None,
        last_billing_date: Some(scheduled.start_date),
        next_billing_date: Some(next_billing),
        ..scheduled
    }))
}

/// Activates every due scheduled subscription, up to `batch_size` organizations
///
/// Failures are logged per organization and do not stop the batch.
/// Returns the number of subscriptions activated.
pub async fn activate_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<usize, LifecycleError> {
    let organizations = Subscription::organizations_with_due_schedules(pool, now, batch_size).await?;

    let mut activated = 0;
    for organization_id in organizations {
        match activate_scheduled(pool, organization_id, now).await {
            Ok(Some(_)) => activated += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    organization_id = %organization_id,
                    error = %e,
                    "Failed to activate scheduled subscription"
                );
            }
        }
    }

    Ok(activated)
}

/// Loads the organization's billing state
pub async fn overview(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<SubscriptionOverview, LifecycleError> {
    if Organization::find_by_id(pool, organization_id).await?.is_none() {
        return Err(LifecycleError::OrganizationNotFound);
    }

    let subscription = Subscription::find_current(pool, organization_id).await?;
    let plan = match &subscription {
        Some(s) => Plan::find_by_id(pool, s.plan_id).await?,
        None => None,
    };

    let scheduled = Subscription::find_scheduled(pool, organization_id).await?;
    let scheduled_plan = match &scheduled {
        Some(s) => Plan::find_by_id(pool, s.plan_id).await?,
        None => None,
    };

    let history = Subscription::list_by_organization(pool, organization_id).await?;

    Ok(SubscriptionOverview {
        subscription,
        plan,
        scheduled,
        scheduled_plan,
        history,
    })
}
