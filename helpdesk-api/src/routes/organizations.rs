//! Organization creation and management
//!
//! - `POST   /v1/organizations`: create an organization, caller becomes admin
//! - `GET    /v1/admin/organization`: management view (enforces the seat limit)
//! - `DELETE /v1/admin/members/:user_id`: remove a member
//! - `PUT    /v1/admin/members/:user_id/role`: change a member's role
//! - `GET    /v1/admin/emails/failed`: outbox jobs that exhausted their retries

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
    membership::{self, CreatedOrganization, OrganizationOverview},
    models::{
        email_job::EmailJob,
        organization::CreateOrganization,
        user::{MemberSummary, Role},
    },
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Failed jobs returned per request
const FAILED_EMAILS_LIMIT: i64 = 100;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be between 1 and 64 characters"))]
    pub name: String,

    #[validate(length(min = 3, max = 120, message = "Domain must be between 3 and 120 characters"))]
    pub domain: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

/// # Errors
///
/// - `403`: the caller already belongs to an organization
/// - `409`: the domain is taken
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateOrganizationRequest>,
) -> ApiResult<(StatusCode, Json<CreatedOrganization>)> {
    require_permission(&auth, Permission::CreateOrganization)?;
    req.validate()?;

    let created = membership::create_organization(
        &state.db,
        auth.user_id,
        CreateOrganization {
            name: req.name.trim().to_string(),
            domain: req.domain,
        },
        Utc::now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn overview(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<OrganizationOverview>> {
    require_permission(&auth, Permission::ManageMembers)?;
    let organization_id = require_organization(&auth)?;

    let overview = membership::organization_overview(&state.db, organization_id, Utc::now()).await?;
    Ok(Json(overview))
}

pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, Permission::ManageMembers)?;

    membership::remove_member(&state.db, &auth, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn change_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> ApiResult<Json<MemberSummary>> {
    require_permission(&auth, Permission::ManageMembers)?;
    let role = Role::from_str(req.role.trim()).map_err(|e| ApiError::invalid_field("role", e))?;

    let member = membership::change_member_role(&state.db, &auth, user_id, role).await?;
    Ok(Json(member))
}

pub async fn failed_emails(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<EmailJob>>> {
    require_permission(&auth, Permission::ViewEmailFailures)?;
    let organization_id = require_organization(&auth)?;

    let jobs =
        EmailJob::list_failed_for_organization(&state.db, organization_id, FAILED_EMAILS_LIMIT)
            .await?;
    Ok(Json(jobs))
}
