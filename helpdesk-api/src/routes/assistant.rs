//! `POST /v1/assistant/chat`: free-form IT question for the AI assistant

use crate::{
    app::AppState,
    clients::assistant::Prompt,
    error::ApiResult,
    routes::tickets::{ChatRequest, ChatResponse},
};
use axum::{extract::State, Json};
use helpdesk_shared::auth::{
    authorization::{require_permission, Permission},
    middleware::AuthContext,
};
use validator::Validate;

pub async fn chat(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    require_permission(&auth, Permission::UseAssistant)?;
    req.validate()?;

    let response = state
        .assistant
        .complete(&Prompt::general(req.message.trim()))
        .await?;

    tracing::debug!(user_id = %auth.user_id, "Assistant chat answered");

    Ok(Json(ChatResponse { response }))
}
