/// Integration tests for payment processor event reconciliation
///
/// These tests require a running PostgreSQL database (see common/mod.rs).

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use helpdesk_shared::billing::lifecycle::{activate_scheduled, cancel, change_plan, ChangeKind};
use helpdesk_shared::billing::reconcile::{
    apply_event, parse_event, ReconcileOutcome, SUBSCRIPTION_DELETED, SUBSCRIPTION_UPDATED,
};
use helpdesk_shared::models::organization::Organization;
use helpdesk_shared::models::plan::Plan;
use helpdesk_shared::models::subscription::{Subscription, SubscriptionStatus};
use helpdesk_shared::models::webhook_event::ProcessedWebhookEvent;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_checkout_completed_activates_plan_once() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let customer = format!("cus_{}", org_id.simple());

    let id = event_id();
    let payload = json!({
        "id": id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_test",
            "customer": customer,
            "subscription": "sub_test",
            "client_reference_id": org_id.to_string(),
            "metadata": {"plan_id": pro.id.to_string(), "organization_id": org_id.to_string()}
        }}
    });
    let event = parse_event(payload.to_string().as_bytes()).unwrap();

    let outcome = apply_event(&pool, &event, common::now()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let org = Organization::find_by_id(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(org.subscription_plan_id, Some(pro.id));
    assert_eq!(org.stripe_customer_id.as_deref(), Some(customer.as_str()));
    assert_eq!(org.stripe_subscription_id.as_deref(), Some("sub_test"));

    let previous = Subscription::find_by_id(&pool, created.subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(previous.status, SubscriptionStatus::Cancelled);

    // Replays are acknowledged but not applied again
    let history_before = Subscription::list_by_organization(&pool, org_id).await.unwrap().len();
    let outcome = apply_event(&pool, &event, common::now()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Duplicate);
    let history_after = Subscription::list_by_organization(&pool, org_id).await.unwrap().len();
    assert_eq!(history_before, history_after);
    assert_eq!(common::active_subscription_count(&pool, org_id).await, 1);

    assert!(ProcessedWebhookEvent::find_by_event_id(&pool, &id)
        .await
        .unwrap()
        .is_some());
}

/// Moves the organization onto a paid plan the way a completed checkout does
async fn checkout(pool: &PgPool, organization_id: Uuid, plan: &Plan) -> (String, String) {
    let customer = format!("cus_{}", organization_id.simple());
    let subscription = format!("sub_{}", Uuid::new_v4().simple());
    let payload = json!({
        "id": event_id(),
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": format!("cs_{}", Uuid::new_v4().simple()),
            "customer": customer,
            "subscription": subscription,
            "metadata": {"plan_id": plan.id.to_string(), "organization_id": organization_id.to_string()}
        }}
    });
    let event = parse_event(payload.to_string().as_bytes()).unwrap();
    assert_eq!(
        apply_event(pool, &event, common::now()).await.unwrap(),
        ReconcileOutcome::Applied
    );
    (customer, subscription)
}

async fn subscription_event(
    pool: &PgPool,
    event_type: &str,
    customer: &str,
    subscription: &str,
    period_end: DateTime<Utc>,
) -> ReconcileOutcome {
    let payload = json!({
        "id": event_id(),
        "type": event_type,
        "data": {"object": {
            "id": subscription,
            "customer": customer,
            "current_period_end": period_end.timestamp()
        }}
    });
    let event = parse_event(payload.to_string().as_bytes()).unwrap();
    apply_event(pool, &event, common::now()).await.unwrap()
}

fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap()
}

#[tokio::test]
async fn test_subscription_deleted_cancels_at_period_end() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let free = Plan::find_free(&pool).await.unwrap().unwrap();
    let (customer, subscription) = checkout(&pool, org_id, &pro).await;

    let period_end = whole_seconds(Utc::now() + Duration::days(12));
    let outcome =
        subscription_event(&pool, SUBSCRIPTION_DELETED, &customer, &subscription, period_end).await;
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let current = Subscription::find_current(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Cancelled);
    assert_eq!(current.end_date, Some(period_end));

    let scheduled = Subscription::find_scheduled(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(scheduled.start_date, period_end);
    assert_eq!(scheduled.plan_id, free.id);
}

#[tokio::test]
async fn test_deletion_after_free_plan_took_over_is_ignored() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let enterprise = Plan::find_by_name(&pool, "Enterprise").await.unwrap().unwrap();
    let (customer, subscription) = checkout(&pool, org_id, &pro).await;

    let cancellation = cancel(&pool, org_id, None, None, common::now()).await.unwrap();
    let period_end = cancellation.scheduled.start_date;

    // The worker switches to Free before the provider reports the deletion
    activate_scheduled(&pool, org_id, period_end + Duration::seconds(1))
        .await
        .unwrap()
        .expect("Free plan was not activated");

    let outcome =
        subscription_event(&pool, SUBSCRIPTION_DELETED, &customer, &subscription, period_end).await;
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    assert_eq!(common::active_subscription_count(&pool, org_id).await, 1);
    assert!(Subscription::find_scheduled(&pool, org_id).await.unwrap().is_none());

    let change = change_plan(&pool, org_id, enterprise.id, common::now()).await.unwrap();
    assert_eq!(change.kind, ChangeKind::Upgrade);
}

#[tokio::test]
async fn test_deletion_replaces_pending_paid_downgrade_with_free() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let enterprise = Plan::find_by_name(&pool, "Enterprise").await.unwrap().unwrap();
    let free = Plan::find_free(&pool).await.unwrap().unwrap();
    let (customer, subscription) = checkout(&pool, org_id, &enterprise).await;

    let change = change_plan(&pool, org_id, pro.id, common::now()).await.unwrap();
    assert_eq!(change.kind, ChangeKind::Downgrade);
    assert_eq!(change.previous.status, SubscriptionStatus::ScheduledDowngrade);
    let period_end = whole_seconds(change.subscription.start_date);

    let outcome =
        subscription_event(&pool, SUBSCRIPTION_DELETED, &customer, &subscription, period_end).await;
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let queued: Vec<Subscription> = Subscription::list_by_organization(&pool, org_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status == SubscriptionStatus::Scheduled)
        .collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].plan_id, free.id);

    activate_scheduled(&pool, org_id, period_end + Duration::days(1))
        .await
        .unwrap()
        .expect("Scheduled row was not activated");

    let org = Organization::find_by_id(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(org.subscription_plan_id, Some(free.id));
    assert_eq!(common::active_subscription_count(&pool, org_id).await, 1);
}

#[tokio::test]
async fn test_events_for_superseded_provider_subscription_are_ignored() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let (customer, _) = checkout(&pool, org_id, &pro).await;

    let outcome = subscription_event(
        &pool,
        SUBSCRIPTION_DELETED,
        &customer,
        "sub_replaced_long_ago",
        Utc::now() + Duration::days(3),
    )
    .await;
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    let current = Subscription::find_current(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Active);
    assert_eq!(current.plan_id, pro.id);
}

#[tokio::test]
async fn test_subscription_updated_follows_billing_period() {
    let pool = common::setup().await;
    let (created, _) = common::create_organization_with_admin(&pool).await;
    let org_id = created.organization.id;
    let pro = Plan::find_by_name(&pool, "Professional").await.unwrap().unwrap();
    let (customer, subscription) = checkout(&pool, org_id, &pro).await;

    let period_end = whole_seconds(Utc::now() + Duration::days(9));
    let outcome =
        subscription_event(&pool, SUBSCRIPTION_UPDATED, &customer, &subscription, period_end).await;
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let current = Subscription::find_current(&pool, org_id).await.unwrap().unwrap();
    assert_eq!(current.next_billing_date, Some(period_end));

    // A later cancellation ends at the provider's period end
    let cancellation = cancel(&pool, org_id, None, None, common::now()).await.unwrap();
    assert_eq!(cancellation.subscription.end_date, Some(period_end));
    assert_eq!(cancellation.scheduled.start_date, period_end);
}

#[tokio::test]
async fn test_unhandled_and_unknown_events_are_ignored() {
    let pool = common::setup().await;

    let payload = json!({
        "id": event_id(),
        "type": "invoice.paid",
        "data": {"object": {"id": "in_1"}}
    });
    let event = parse_event(payload.to_string().as_bytes()).unwrap();
    assert_eq!(
        apply_event(&pool, &event, common::now()).await.unwrap(),
        ReconcileOutcome::Ignored
    );

    let payload = json!({
        "id": event_id(),
        "type": "customer.subscription.updated",
        "data": {"object": {"id": "sub_x", "customer": format!("cus_unknown_{}", Uuid::new_v4().simple())}}
    });
    let event = parse_event(payload.to_string().as_bytes()).unwrap();
    assert_eq!(
        apply_event(&pool, &event, common::now()).await.unwrap(),
        ReconcileOutcome::Ignored
    );
}
