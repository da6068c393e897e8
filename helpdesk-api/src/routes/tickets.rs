//! Ticket endpoints
//!
//! All routes require a member of an organization. Plain users only ever
//! see the tickets they submitted; staff and admins see the whole
//! organization queue.
//!
//! - `GET    /v1/tickets`: visible tickets, newest first
//! - `POST   /v1/tickets`: submit a ticket (AI suggestion, round-robin assignee)
//! - `GET    /v1/tickets/filter?filters=...`: visible tickets restricted by filters
//! - `GET    /v1/tickets/:id`: ticket with responses and comments
//! - `DELETE /v1/tickets/:id`: staff or the submitter
//! - `PUT    /v1/tickets/:id/status`: staff only
//! - `POST   /v1/tickets/:id/responses`
//! - `POST   /v1/tickets/:id/comments`
//! - `POST   /v1/tickets/:id/chat`: ask the assistant about the ticket

use crate::{
    app::AppState,
    clients::assistant::{suggest_fix, Prompt},
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use helpdesk_shared::{
    assignment,
    auth::{
        authorization::{
            require_organization, require_permission, require_same_organization, Permission,
        },
        middleware::AuthContext,
    },
    models::{
        ticket::{
            parse_filters, NewTicket, Ticket, TicketCategory, TicketPriority, TicketScope,
            TicketStatus, TicketSummary,
        },
        ticket_comment::{TicketComment, TicketCommentView},
        ticket_response::{TicketResponse, TicketResponseView},
    },
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Query key carrying ticket filters
const FILTERS_PARAM: &str = "filters";

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 5, max = 100, message = "Title must be between 5 and 100 characters"))]
    pub title: String,

    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: String,

    #[serde(default)]
    pub priority: TicketPriority,

    #[serde(default)]
    pub category: TicketCategory,

    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResponseRequest {
    #[validate(length(min = 2, message = "Response must be at least 2 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(length(min = 2, message = "Comment must be at least 2 characters"))]
    pub content: String,

    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 2, max = 500, message = "Message must be between 2 and 500 characters"))]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Ticket page payload
#[derive(Debug, Serialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub responses: Vec<TicketResponseView>,

    /// Internal comments are only included for staff
    pub comments: Vec<TicketCommentView>,

    pub overdue: bool,
}

fn scope_for(auth: &AuthContext) -> ApiResult<TicketScope> {
    require_permission(auth, Permission::ViewOwnTickets)?;
    let organization_id = require_organization(auth)?;

    Ok(TicketScope {
        organization_id,
        user_id: auth.user_id,
        is_staff: auth.is_staff(),
    })
}

/// Loads a ticket the caller is allowed to see
///
/// Missing tickets are 404; tickets of another organization or another
/// submitter are 403.
async fn load_visible(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Ticket> {
    let scope = scope_for(auth)?;

    let ticket = Ticket::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))?;

    require_same_organization(auth, ticket.organization_id)?;
    if !scope.can_view(&ticket) {
        return Err(ApiError::Forbidden(
            "You are not authorized to view this ticket".to_string(),
        ));
    }

    Ok(ticket)
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<TicketSummary>>> {
    let scope = scope_for(&auth)?;
    let tickets = Ticket::list_summaries(&state.db, &scope, &[], Utc::now(), None).await?;
    Ok(Json(tickets))
}

/// Filters compose: every one given restricts the result further
///
/// Both `?filters=high_priority,overdue` and
/// `?filters=high_priority&filters=overdue` are accepted. Unknown filter
/// names are rejected with 400.
pub async fn filter(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<TicketSummary>>> {
    let scope = scope_for(&auth)?;

    let filters = parse_filters(
        params
            .iter()
            .filter(|(key, _)| key == FILTERS_PARAM)
            .map(|(_, value)| value.as_str()),
    )
    .map_err(ApiError::BadRequest)?;

    let tickets = Ticket::list_summaries(&state.db, &scope, &filters, Utc::now(), None).await?;
    Ok(Json(tickets))
}

/// Creates a ticket and assigns it to the next staff member in rotation
///
/// The AI suggestion is requested before the transaction opens; a failed
/// request stores a placeholder instead of failing the submission.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    require_permission(&auth, Permission::SubmitTicket)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    let title = req.title.trim().to_string();
    let suggestion = suggest_fix(state.assistant.as_ref(), &title, &req.description).await;

    let mut tx = state.db.begin().await?;
    let assignee_id = assignment::pick_assignee(&mut tx, organization_id).await?;

    let ticket = Ticket::create(
        &mut *tx,
        NewTicket {
            organization_id,
            title,
            description: req.description,
            priority: req.priority,
            category: req.category,
            submitter_id: auth.user_id,
            assignee_id,
            due_date: req.due_date,
            ai_suggestion: Some(suggestion),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        ticket_id = %ticket.id,
        organization_id = %organization_id,
        assignee_id = ?ticket.assignee_id,
        "Ticket created"
    );

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn show(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TicketDetail>> {
    let ticket = load_visible(&state, &auth, id).await?;

    let responses = TicketResponse::list_for_ticket(&state.db, ticket.id).await?;
    let comments = TicketComment::list_for_ticket(&state.db, ticket.id, auth.is_staff()).await?;

    Ok(Json(TicketDetail {
        overdue: ticket.is_overdue(Utc::now()),
        ticket,
        responses,
        comments,
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let ticket = load_visible(&state, &auth, id).await?;

    let is_submitter = ticket.submitter_id == Some(auth.user_id);
    if !is_submitter {
        require_permission(&auth, Permission::DeleteAnyTicket)?;
    }

    Ticket::delete(&state.db, ticket.id).await?;

    tracing::info!(ticket_id = %ticket.id, deleted_by = %auth.user_id, "Ticket deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Ticket>> {
    require_permission(&auth, Permission::UpdateTicketStatus)?;
    let status =
        TicketStatus::from_str(req.status.trim()).map_err(|e| ApiError::invalid_field("status", e))?;

    let ticket = load_visible(&state, &auth, id).await?;

    let updated = Ticket::update_status(&state.db, ticket.id, status, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))?;

    tracing::info!(ticket_id = %updated.id, status = status.as_str(), "Ticket status updated");

    Ok(Json(updated))
}

/// Posts a reply; staff replies also stamp the response tracking fields
pub async fn add_response(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ResponseRequest>,
) -> ApiResult<(StatusCode, Json<TicketResponse>)> {
    require_permission(&auth, Permission::RespondToTicket)?;
    req.validate()?;

    let ticket = load_visible(&state, &auth, id).await?;

    let mut tx = state.db.begin().await?;
    let response = TicketResponse::create(&mut *tx, ticket.id, auth.user_id, req.content.trim()).await?;
    if auth.is_staff() {
        Ticket::record_staff_response(&mut *tx, ticket.id, auth.user_id, response.created_at).await?;
    }
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<TicketComment>)> {
    require_permission(&auth, Permission::CommentOnTicket)?;
    if req.is_internal {
        require_permission(&auth, Permission::WriteInternalComment)?;
    }
    req.validate()?;

    let ticket = load_visible(&state, &auth, id).await?;

    let comment =
        TicketComment::create(&state.db, ticket.id, auth.user_id, req.content.trim(), req.is_internal)
            .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// # Errors
///
/// - `502`: the AI provider failed; the message is an apology
pub async fn chat(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    require_permission(&auth, Permission::UseAssistant)?;
    req.validate()?;

    let ticket = load_visible(&state, &auth, id).await?;

    let response = state
        .assistant
        .complete(&Prompt::ticket_chat(&ticket.title, &ticket.description, &req.message))
        .await?;

    Ok(Json(ChatResponse { response }))
}
