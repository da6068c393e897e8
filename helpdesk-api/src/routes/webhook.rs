//! `POST /admin/webhook`: payment processor callbacks
//!
//! The raw body is verified against the `Stripe-Signature` header before
//! anything is parsed. A delivery that fails verification is answered with
//! 400 and touches nothing; verified events are reconciled through the
//! processed-event ledger, so redeliveries are acknowledged as duplicates.

use crate::{app::AppState, error::ApiResult};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use helpdesk_shared::billing::{
    reconcile::{self, ReconcileOutcome},
    webhook::verify_signature,
};
use serde::Serialize;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: ReconcileOutcome,
}

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let now = Utc::now();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = verify_signature(
        signature,
        &body,
        &state.config.stripe.webhook_secret,
        now.timestamp(),
    ) {
        tracing::warn!(error = %e, "Rejected webhook delivery");
        return Err(e.into());
    }

    let event = reconcile::parse_event(&body)?;
    let outcome = reconcile::apply_event(&state.db, &event, now).await?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        outcome = ?outcome,
        "Webhook event processed"
    );

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
