//! `GET /v1/plans`: the public plan catalog, cheapest first

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use helpdesk_shared::models::plan::Plan;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub price: f64,
    pub team_size_limit: i32,
    pub description: Option<String>,
    pub features: Vec<String>,
}

impl From<Plan> for PlanView {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            price: plan.price_dollars(),
            name: plan.name,
            price_cents: plan.price_cents,
            team_size_limit: plan.team_size_limit,
            description: plan.description,
            features: plan.features.0,
        }
    }
}

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<PlanView>>> {
    let plans = Plan::list_active(&state.db).await?;
    Ok(Json(plans.into_iter().map(PlanView::from).collect()))
}
