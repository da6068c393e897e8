//! Invitation endpoints
//!
//! For the invited user:
//!
//! - `GET  /v1/invitations`: unexpired invitations addressed to the caller
//! - `POST /v1/invitations/:token/accept`
//! - `POST /v1/invitations/:token/decline`
//! - `POST /v1/invitations/join`: accept with the token in the body
//!
//! For organization admins:
//!
//! - `POST   /v1/admin/invitations`: invite an email with a role
//! - `POST   /v1/admin/invitations/:token/resend`: extend and re-send
//! - `DELETE /v1/admin/invitations/:token`: cancel

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use helpdesk_shared::{
    auth::{
        authorization::{require_organization, require_permission, Permission},
        middleware::AuthContext,
    },
    membership,
    models::{
        invitation::{Invitation, PendingInvitation},
        organization::Organization,
        user::Role,
    },
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct InviteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// `user`, `staff` or `admin`; defaults to `user`
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct JoinedResponse {
    pub organization: Organization,
    pub message: String,
}

pub async fn list_pending(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<PendingInvitation>>> {
    let invitations = membership::pending_invitations(&state.db, &auth, Utc::now()).await?;
    Ok(Json(invitations))
}

async fn join_with_token(state: &AppState, auth: &AuthContext, token: &str) -> ApiResult<JoinedResponse> {
    let organization = membership::accept_invitation(&state.db, auth, token, Utc::now()).await?;

    Ok(JoinedResponse {
        message: format!("You have successfully joined {}!", organization.name),
        organization,
    })
}

/// # Errors
///
/// - `404`: unknown token
/// - `403`: the invitation is addressed to another email
/// - `400`: the invitation has expired
pub async fn accept(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ApiResult<Json<JoinedResponse>> {
    Ok(Json(join_with_token(&state, &auth, &token).await?))
}

pub async fn join(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<JoinRequest>,
) -> ApiResult<Json<JoinedResponse>> {
    if req.token.trim().is_empty() {
        return Err(ApiError::invalid_field("token", "Invitation token is required"));
    }
    Ok(Json(join_with_token(&state, &auth, &req.token).await?))
}

pub async fn decline(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    membership::decline_invitation(&state.db, &auth, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # Errors
///
/// - `409`: already a member, or a live invitation exists for the email
/// - `422`: invalid email or role
pub async fn invite(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<InviteRequest>,
) -> ApiResult<(StatusCode, Json<Invitation>)> {
    require_permission(&auth, Permission::ManageInvitations)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    let role = match req.role.as_deref().map(str::trim) {
        None | Some("") => Role::User,
        Some(value) => Role::from_str(value).map_err(|e| ApiError::invalid_field("role", e))?,
    };

    let invitation = membership::invite(
        &state.db,
        organization_id,
        &req.email,
        role,
        &state.config.api.public_url,
        Utc::now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(invitation)))
}

pub async fn resend(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ApiResult<Json<Invitation>> {
    require_permission(&auth, Permission::ManageInvitations)?;
    let organization_id = require_organization(&auth)?;

    let invitation = membership::resend_invitation(
        &state.db,
        organization_id,
        &token,
        &state.config.api.public_url,
        Utc::now(),
    )
    .await?;

    Ok(Json(invitation))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, Permission::ManageInvitations)?;
    let organization_id = require_organization(&auth)?;

    membership::cancel_invitation(&state.db, organization_id, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}
