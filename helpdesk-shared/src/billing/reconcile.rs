//! Applying payment processor events
//!
//! Events arrive already verified (see [`super::webhook`]). Each handled
//! event is claimed in the processed-event ledger inside the same
//! transaction as its changes, so a replay is acknowledged without being
//! applied twice and a failed reconciliation can be retried.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::billing_period;
use crate::db::lock::{lock_for_transaction, LockScope};
use crate::models::organization::Organization;
use crate::models::plan::Plan;
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionStatus};
use crate::models::webhook_event::ProcessedWebhookEvent;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("The Free plan is missing from the plan catalog")]
    FreePlanMissing,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Envelope shared by every event
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// `checkout.session.completed` object
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,

    #[serde(default)]
    pub customer: Option<String>,

    #[serde(default)]
    pub subscription: Option<String>,

    #[serde(default)]
    pub client_reference_id: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    fn metadata_uuid(&self, key: &str) -> Option<Uuid> {
        self.metadata.get(key).and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn organization_id(&self) -> Option<Uuid> {
        self.metadata_uuid("organization_id").or_else(|| {
            self.client_reference_id
                .as_deref()
                .and_then(|v| Uuid::parse_str(v).ok())
        })
    }

    pub fn plan_id(&self) -> Option<Uuid> {
        self.metadata_uuid("plan_id")
    }
}

/// `customer.subscription.*` object
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,

    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// What happened to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Changes committed
    Applied,

    /// Already in the ledger; nothing done
    Duplicate,

    /// Unhandled type, or refers to records that do not exist
    Ignored,
}

pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent, ReconcileError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Applies a verified event
pub async fn apply_event(
    pool: &PgPool,
    event: &ProviderEvent,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, ReconcileError> {
    let handled = matches!(
        event.event_type.as_str(),
        CHECKOUT_COMPLETED | SUBSCRIPTION_DELETED | SUBSCRIPTION_UPDATED
    );
    if !handled {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
        return Ok(ReconcileOutcome::Ignored);
    }

    let mut tx = pool.begin().await?;

    if !ProcessedWebhookEvent::claim(&mut *tx, &event.id, &event.event_type).await? {
        tracing::info!(event_id = %event.id, "Webhook event already processed");
        return Ok(ReconcileOutcome::Duplicate);
    }

    let outcome = match event.event_type.as_str() {
        CHECKOUT_COMPLETED => {
            let session: CheckoutSession = serde_json::from_value(event.data.object.clone())?;
            checkout_completed(&mut tx, &session, now).await?
        }
        SUBSCRIPTION_DELETED => {
            let sub: ProviderSubscription = serde_json::from_value(event.data.object.clone())?;
            subscription_deleted(&mut tx, &sub, now).await?
        }
        _ => {
            let sub: ProviderSubscription = serde_json::from_value(event.data.object.clone())?;
            subscription_updated(&mut tx, &sub).await?
        }
    };

    tx.commit().await?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        outcome = ?outcome,
        "Webhook event reconciled"
    );

    Ok(outcome)
}

/// Replaces whatever is in effect with an active subscription to the paid plan
async fn checkout_completed(
    tx: &mut Transaction<'_, Postgres>,
    session: &CheckoutSession,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, ReconcileError> {
    let (Some(organization_id), Some(plan_id)) = (session.organization_id(), session.plan_id())
    else {
        tracing::warn!(session_id = %session.id, "Checkout session without organization or plan metadata");
        return Ok(ReconcileOutcome::Ignored);
    };

    lock_for_transaction(&mut **tx, LockScope::Subscription(organization_id)).await?;

    let organization = Organization::find_by_id(&mut **tx, organization_id).await?;
    let plan = Plan::find_by_id(&mut **tx, plan_id).await?;
    let (Some(organization), Some(plan)) = (organization, plan) else {
        tracing::warn!(
            session_id = %session.id,
            organization_id = %organization_id,
            plan_id = %plan_id,
            "Checkout session refers to an unknown organization or plan"
        );
        return Ok(ReconcileOutcome::Ignored);
    };

    Subscription::end_live(&mut **tx, organization.id, now).await?;
    Subscription::delete_scheduled(&mut **tx, organization.id).await?;

    let subscription = Subscription::insert(
        &mut **tx,
        NewSubscription {
            organization_id: organization.id,
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: None,
            last_billing_date: Some(now),
            next_billing_date: Some(now + billing_period()),
        },
    )
    .await?;

    Organization::set_current_subscription(&mut **tx, organization.id, plan.id, subscription.id)
        .await?;
    Organization::set_stripe_ids(
        &mut **tx,
        organization.id,
        session.customer.as_deref(),
        session.subscription.as_deref(),
    )
    .await?;

    tracing::info!(
        organization_id = %organization.id,
        plan = %plan.name,
        "Checkout completed; subscription activated"
    );

    Ok(ReconcileOutcome::Applied)
}

/// The paid subscription a provider subscription object refers to
///
/// `None` when the organization has moved on to another provider
/// subscription, or when what is in effect locally is no longer a paid plan
/// (the queued Free row may already have been activated at period end).
async fn live_paid_subscription(
    tx: &mut Transaction<'_, Postgres>,
    organization: &Organization,
    sub: &ProviderSubscription,
) -> Result<Option<Subscription>, ReconcileError> {
    if let Some(stored) = organization.stripe_subscription_id.as_deref() {
        if stored != sub.id {
            tracing::debug!(
                organization_id = %organization.id,
                stored = %stored,
                received = %sub.id,
                "Event for a superseded provider subscription"
            );
            return Ok(None);
        }
    }

    let Some(current) = Subscription::find_current(&mut **tx, organization.id).await? else {
        return Ok(None);
    };
    if !current.is_live() {
        return Ok(None);
    }

    let paid = Plan::find_by_id(&mut **tx, current.plan_id)
        .await?
        .is_some_and(|plan| !plan.is_free());

    Ok(paid.then_some(current))
}

fn period_end(sub: &ProviderSubscription) -> Option<DateTime<Utc>> {
    sub.current_period_end
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

/// Ends the local paid subscription at the provider's period end
///
/// Whatever was queued behind it is replaced by a Free row starting at that
/// date: without billing the organization cannot move on to another paid plan.
async fn subscription_deleted(
    tx: &mut Transaction<'_, Postgres>,
    sub: &ProviderSubscription,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, ReconcileError> {
    let Some(organization) = Organization::find_by_stripe_customer(&mut **tx, &sub.customer).await?
    else {
        tracing::warn!(customer = %sub.customer, "Subscription deleted for unknown customer");
        return Ok(ReconcileOutcome::Ignored);
    };

    lock_for_transaction(&mut **tx, LockScope::Subscription(organization.id)).await?;

    let Some(current) = live_paid_subscription(tx, &organization, sub).await? else {
        tracing::info!(
            organization_id = %organization.id,
            subscription = %sub.id,
            "No paid subscription in effect; deletion ignored"
        );
        return Ok(ReconcileOutcome::Ignored);
    };

    let ends_at = period_end(sub).unwrap_or(now);

    Subscription::set_status(&mut **tx, current.id, SubscriptionStatus::Cancelled, Some(ends_at))
        .await?;

    let free = Plan::find_free(&mut **tx)
        .await?
        .ok_or(ReconcileError::FreePlanMissing)?;

    let dropped = Subscription::delete_scheduled(&mut **tx, organization.id).await?;
    Subscription::insert(
        &mut **tx,
        NewSubscription {
            organization_id: organization.id,
            plan_id: free.id,
            status: SubscriptionStatus::Scheduled,
            start_date: ends_at,
            end_date: None,
            last_billing_date: None,
            next_billing_date: None,
        },
    )
    .await?;

    tracing::info!(
        organization_id = %organization.id,
        ends_at = %ends_at,
        replaced_schedules = dropped,
        "Provider subscription deleted; local subscription cancelled"
    );

    Ok(ReconcileOutcome::Applied)
}

/// Stores the provider subscription id and follows its billing period
async fn subscription_updated(
    tx: &mut Transaction<'_, Postgres>,
    sub: &ProviderSubscription,
) -> Result<ReconcileOutcome, ReconcileError> {
    let Some(organization) = Organization::find_by_stripe_customer(&mut **tx, &sub.customer).await?
    else {
        return Ok(ReconcileOutcome::Ignored);
    };

    lock_for_transaction(&mut **tx, LockScope::Subscription(organization.id)).await?;

    // Period end only moves for an active row; a pending downgrade keeps the
    // date its scheduled successor starts on.
    if let Some(next_billing) = period_end(sub) {
        if let Some(current) = live_paid_subscription(tx, &organization, sub).await? {
            if current.status == SubscriptionStatus::Active {
                Subscription::set_next_billing_date(&mut **tx, current.id, next_billing).await?;
            }
        }
    }

    Organization::set_stripe_ids(&mut **tx, organization.id, None, Some(&sub.id)).await?;
    tracing::info!(organization_id = %organization.id, "Stored provider subscription id");

    Ok(ReconcileOutcome::Applied)
}
