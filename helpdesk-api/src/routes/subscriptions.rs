//! Subscription management for organization admins
//!
//! - `GET  /v1/admin/subscription`: current, scheduled and past subscriptions
//! - `POST /v1/admin/subscription/change`: upgrade now or schedule a downgrade
//! - `POST /v1/admin/subscription/cancel`: cancel at the end of the period
//! - `POST /v1/admin/subscription/reactivate`: undo a cancellation
//! - `POST /v1/admin/subscription/revert-downgrade`: drop a scheduled downgrade
//! - `POST /v1/admin/checkout-session`: hosted checkout for a paid plan

use crate::{
    app::AppState,
    clients::checkout::CheckoutRequest,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Json};
use chrono::Utc;
use helpdesk_shared::{
    auth::{
        authorization::{require_organization, require_permission, Permission},
        middleware::AuthContext,
    },
    billing::lifecycle::{self, Cancellation, PlanChange, SubscriptionOverview},
    models::{plan::Plan, subscription::Subscription},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 100, message = "Reason must be at most 100 characters"))]
    #[serde(default)]
    pub reason: Option<String>,

    #[validate(length(max = 2000, message = "Feedback must be at most 2000 characters"))]
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub plan_id: Uuid,

    #[serde(default)]
    pub success_url: Option<String>,

    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// What the browser needs to redirect to the hosted checkout page
#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,

    /// Publishable key for the provider's browser SDK
    pub public_key: String,
}

/// Caller's organization, provided they may manage billing
fn billing_organization(auth: &AuthContext) -> ApiResult<Uuid> {
    require_permission(auth, Permission::ManageBilling)?;
    Ok(require_organization(auth)?)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub async fn show(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<SubscriptionOverview>> {
    let organization_id = billing_organization(&auth)?;
    Ok(Json(lifecycle::overview(&state.db, organization_id).await?))
}

/// # Errors
///
/// - `404`: unknown plan
/// - `409`: same plan, subscription not active, or too many active members
///   for the target plan's seat limit
pub async fn change_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChange>> {
    let organization_id = billing_organization(&auth)?;

    let change = lifecycle::change_plan(&state.db, organization_id, req.plan_id, Utc::now()).await?;

    tracing::info!(
        organization_id = %organization_id,
        plan = %change.plan.name,
        kind = ?change.kind,
        "Subscription plan changed"
    );

    Ok(Json(change))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Cancellation>> {
    let organization_id = billing_organization(&auth)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let cancellation = lifecycle::cancel(
        &state.db,
        organization_id,
        non_blank(req.reason.as_deref()),
        non_blank(req.feedback.as_deref()),
        Utc::now(),
    )
    .await?;

    tracing::info!(organization_id = %organization_id, "Subscription cancelled");

    Ok(Json(cancellation))
}

pub async fn reactivate(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Subscription>> {
    let organization_id = billing_organization(&auth)?;
    Ok(Json(lifecycle::reactivate(&state.db, organization_id).await?))
}

pub async fn revert_downgrade(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Subscription>> {
    let organization_id = billing_organization(&auth)?;
    Ok(Json(lifecycle::revert_downgrade(&state.db, organization_id).await?))
}

/// Starts a hosted checkout for `plan_id`
///
/// The plan is activated by the `checkout.session.completed` webhook, not
/// by this call.
///
/// # Errors
///
/// - `404`: unknown or inactive plan
/// - `422`: the plan is free
/// - `502`/`503`: the payment provider failed or is not configured
pub async fn checkout_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CheckoutSessionRequest>,
) -> ApiResult<Json<CheckoutSessionResponse>> {
    let organization_id = billing_organization(&auth)?;

    let plan = Plan::find_by_id(&state.db, req.plan_id)
        .await?
        .filter(|plan| plan.is_active)
        .ok_or_else(|| ApiError::NotFound("Plan not found".to_string()))?;

    if plan.is_free() {
        return Err(ApiError::invalid_field(
            "plan_id",
            "The Free plan does not require checkout",
        ));
    }

    let success_url = match non_blank(req.success_url.as_deref()) {
        Some(url) => url.to_string(),
        None => state.public_url(&format!(
            "/v1/admin/subscription?checkout=success&plan_id={}",
            plan.id
        )),
    };
    let cancel_url = match non_blank(req.cancel_url.as_deref()) {
        Some(url) => url.to_string(),
        None => state.public_url("/v1/admin/organization"),
    };

    let session = state
        .checkout
        .create_session(&CheckoutRequest {
            organization_id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            price_cents: plan.price_cents,
            success_url,
            cancel_url,
        })
        .await?;

    tracing::info!(
        organization_id = %organization_id,
        plan = %plan.name,
        session_id = %session.id,
        "Checkout session created"
    );

    Ok(Json(CheckoutSessionResponse {
        session_id: session.id,
        url: session.url,
        public_key: state.config.stripe.public_key.clone(),
    }))
}
