/// Integration tests for subscriptions, checkout and payment webhooks
///
/// These tests require a running PostgreSQL database (see common/mod.rs).

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{TestContext, WEBHOOK_SECRET};
use helpdesk_shared::billing::webhook::compute_signature;
use helpdesk_shared::models::organization::Organization;
use helpdesk_shared::models::plan::Plan;
use helpdesk_shared::models::user::Role;
use serde_json::{json, Value};
use uuid::Uuid;

async fn plan(ctx: &TestContext, name: &str) -> Plan {
    Plan::find_by_name(&ctx.db, name)
        .await
        .expect("Failed to load plan")
        .expect("Plan missing from catalog")
}

fn webhook_request(payload: &Value, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/admin/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder
        .body(Body::from(payload.to_string()))
        .expect("Failed to build request")
}

fn sign(payload: &Value) -> String {
    let timestamp = Utc::now().timestamp();
    let signature =
        compute_signature(WEBHOOK_SECRET, timestamp, payload.to_string().as_bytes()).unwrap();
    format!("t={},v1={}", timestamp, signature)
}

fn checkout_completed(event_id: &str, organization_id: Uuid, plan_id: Uuid) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": format!("cs_{}", Uuid::new_v4().simple()),
                "customer": format!("cus_{}", Uuid::new_v4().simple()),
                "subscription": format!("sub_{}", Uuid::new_v4().simple()),
                "client_reference_id": organization_id.to_string(),
                "metadata": {
                    "organization_id": organization_id.to_string(),
                    "plan_id": plan_id.to_string(),
                },
            },
        },
    })
}

async fn ledger_rows(ctx: &TestContext, event_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM processed_webhook_events WHERE event_id = $1")
        .bind(event_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upgrade_downgrade_and_revert() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let token = ctx.token(&org.admin);

    let free = plan(&ctx, "Free").await;
    let professional = plan(&ctx, "Professional").await;

    let (status, overview) = ctx.get("/v1/admin/subscription", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["plan"]["name"], "Free");
    assert!(overview["scheduled"].is_null());

    let (status, change) = ctx
        .post(
            "/v1/admin/subscription/change",
            &token,
            json!({ "plan_id": professional.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", change);
    assert_eq!(change["kind"], "upgrade");
    assert_eq!(change["subscription"]["status"], "active");

    let (status, _) = ctx
        .post(
            "/v1/admin/subscription/change",
            &token,
            json!({ "plan_id": professional.id }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, change) = ctx
        .post(
            "/v1/admin/subscription/change",
            &token,
            json!({ "plan_id": free.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(change["kind"], "downgrade");
    assert_eq!(change["subscription"]["status"], "scheduled");
    assert_eq!(change["previous"]["status"], "scheduled_downgrade");

    // Still on the paid plan until the period ends
    let organization = Organization::find_by_id(&ctx.db, org.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(organization.subscription_plan_id, Some(professional.id));

    let (status, restored) = ctx
        .post("/v1/admin/subscription/revert-downgrade", &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["status"], "active");
    assert_eq!(restored["plan_id"], professional.id.to_string());

    let (_, overview) = ctx.get("/v1/admin/subscription", &token).await;
    assert!(overview["scheduled"].is_null());

    let (status, _) = ctx
        .post("/v1/admin/subscription/revert-downgrade", &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_and_reactivate() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let token = ctx.token(&org.admin);

    // Nothing to cancel on the Free plan
    let (status, _) = ctx
        .post("/v1/admin/subscription/cancel", &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let professional = plan(&ctx, "Professional").await;
    ctx.post(
        "/v1/admin/subscription/change",
        &token,
        json!({ "plan_id": professional.id }),
    )
    .await;

    let (status, cancelled) = ctx
        .post(
            "/v1/admin/subscription/cancel",
            &token,
            json!({ "reason": "Too expensive", "feedback": "We are a team of three." }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", cancelled);
    assert_eq!(cancelled["subscription"]["status"], "cancelled");
    assert_eq!(cancelled["scheduled"]["status"], "scheduled");

    let (status, reactivated) = ctx
        .post("/v1/admin/subscription/reactivate", &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reactivated["status"], "active");
}

#[tokio::test]
async fn test_billing_requires_admin() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let staff = ctx
        .add_member(org.organization.id, Role::Staff)
        .await
        .unwrap();

    let (status, _) = ctx
        .get("/v1/admin/subscription", &ctx.token(&staff))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_checkout_session() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let token = ctx.token(&org.admin);

    let professional = plan(&ctx, "Professional").await;
    let (status, session) = ctx
        .post(
            "/v1/admin/checkout-session",
            &token,
            json!({ "plan_id": professional.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    assert_eq!(session["session_id"], "cs_test_123");
    assert_eq!(session["url"], "https://checkout.test/pay/cs_test_123");
    assert_eq!(session["public_key"], "pk_test_helpdesk");

    let request = ctx
        .checkout
        .requests()
        .into_iter()
        .find(|r| r.organization_id == org.organization.id)
        .expect("Checkout provider was not called");
    assert_eq!(request.plan_id, professional.id);
    assert_eq!(request.price_cents, 1500);
    assert_eq!(
        request.success_url,
        format!(
            "http://helpdesk.test/v1/admin/subscription?checkout=success&plan_id={}",
            professional.id
        )
    );
    assert_eq!(request.cancel_url, "http://helpdesk.test/v1/admin/organization");

    // Checkout does not change the plan; the webhook does
    let organization = Organization::find_by_id(&ctx.db, org.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(organization.subscription_plan_id, Some(professional.id));

    let free = plan(&ctx, "Free").await;
    let (status, _) = ctx
        .post(
            "/v1/admin/checkout-session",
            &token,
            json!({ "plan_id": free.id }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx
        .post(
            "/v1/admin/checkout-session",
            &token,
            json!({ "plan_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signatures() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let professional = plan(&ctx, "Professional").await;

    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let payload = checkout_completed(&event_id, org.organization.id, professional.id);

    let (status, body) = ctx.send(webhook_request(&payload, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let forged = format!("t={},v1={}", Utc::now().timestamp(), "0".repeat(64));
    let (status, _) = ctx.send(webhook_request(&payload, Some(forged))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Signed for a different body
    let other = checkout_completed(&event_id, org.organization.id, Uuid::new_v4());
    let (status, _) = ctx.send(webhook_request(&payload, Some(sign(&other)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(ledger_rows(&ctx, &event_id).await, 0);
    let organization = Organization::find_by_id(&ctx.db, org.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(organization.subscription_plan_id, Some(professional.id));
}

#[tokio::test]
async fn test_webhook_activates_plan_once() {
    let ctx = TestContext::new().await.unwrap();
    let org = ctx.create_organization().await.unwrap();
    let professional = plan(&ctx, "Professional").await;

    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let payload = checkout_completed(&event_id, org.organization.id, professional.id);

    let (status, ack) = ctx
        .send(webhook_request(&payload, Some(sign(&payload))))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", ack);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["outcome"], "applied");

    let organization = Organization::find_by_id(&ctx.db, org.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(organization.subscription_plan_id, Some(professional.id));
    assert!(organization.stripe_customer_id.is_some());
    let first_subscription = organization.current_subscription_id;

    let (status, ack) = ctx
        .send(webhook_request(&payload, Some(sign(&payload))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "duplicate");

    let organization = Organization::find_by_id(&ctx.db, org.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(organization.current_subscription_id, first_subscription);
    assert_eq!(ledger_rows(&ctx, &event_id).await, 1);
}

#[tokio::test]
async fn test_webhook_ignores_unhandled_events() {
    let ctx = TestContext::new().await.unwrap();

    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let payload = json!({
        "id": event_id,
        "type": "invoice.paid",
        "data": { "object": { "id": "in_123" } },
    });

    let (status, ack) = ctx
        .send(webhook_request(&payload, Some(sign(&payload))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "ignored");
    assert_eq!(ledger_rows(&ctx, &event_id).await, 0);
}
