//! `GET /health`
//!
//! ```json
//! { "status": "healthy", "version": "0.1.0", "database": "connected" }
//! ```

use crate::app::AppState;
use axum::{extract::State, Json};
use helpdesk_shared::db::pool::health_check as database_health;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

/// Always answers 200; a database outage shows up as `degraded`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, database) = match database_health(&state.db).await {
        Ok(()) => ("healthy", "connected"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            ("degraded", "disconnected")
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
    })
}
