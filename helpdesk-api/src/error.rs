//! Error handling for the API server
//!
//! Handlers return [`ApiResult`]. Every library error converts into an
//! [`ApiError`] through `?`, and the error renders as
//! `{"error": code, "message": text, "details": [...]}`.
//!
//! | Error | Status |
//! |-------|--------|
//! | validation | 422 `validation_error` |
//! | authorization | 403 `forbidden` |
//! | missing record | 404 `not_found` |
//! | rule conflict, unique violation | 409 `conflict` |
//! | unverifiable webhook | 400 `bad_request` |
//! | payment or AI provider failure | 502 `bad_gateway` |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use helpdesk_shared::auth::authorization::AuthzError;
use helpdesk_shared::auth::jwt::JwtError;
use helpdesk_shared::auth::middleware::AuthError;
use helpdesk_shared::auth::password::PasswordError;
use helpdesk_shared::billing::lifecycle::LifecycleError;
use helpdesk_shared::billing::reconcile::ReconcileError;
use helpdesk_shared::billing::webhook::SignatureError;
use helpdesk_shared::membership::MembershipError;
use helpdesk_shared::seats::SeatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::ValidationErrors;

use crate::clients::assistant::AssistantError;
use crate::clients::checkout::CheckoutError;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),

    /// 401
    Unauthorized(String),

    /// 403
    Forbidden(String),

    /// 404
    NotFound(String),

    /// 409, e.g. duplicate domain or invalid lifecycle state
    Conflict(String),

    /// 422
    ValidationError(Vec<ValidationErrorDetail>),

    /// 500
    InternalError(String),

    /// 502, an upstream provider failed
    BadGateway(String),

    /// 503
    ServiceUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "bad_request", "conflict")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation failure
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.to_string(),
            message: message.into(),
        }])
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg, None),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        let mut errors: Vec<ValidationErrorDetail> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(errors)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let message = match db_err.constraint() {
                        Some(c) if c.contains("email") => "Email already registered".to_string(),
                        Some(c) if c.contains("username") => "Username already taken".to_string(),
                        Some(c) if c.contains("domain") => {
                            "An organization with this domain already exists".to_string()
                        }
                        Some(c) => format!("Constraint violation: {}", c),
                        None => "Duplicate record".to_string(),
                    };
                    return ApiError::Conflict(message);
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Missing credentials".to_string()),
            AuthError::InvalidFormat(msg) => ApiError::BadRequest(msg),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
            AuthError::Inactive => ApiError::Unauthorized("Account is disabled".to_string()),
            AuthError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::DatabaseError(e) => e.into(),
            other => ApiError::Forbidden(other.to_string()),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("Invalid token issuer".to_string()),
            JwtError::CreateError(msg) => {
                ApiError::InternalError(format!("Failed to create token: {}", msg))
            }
            _ => ApiError::Unauthorized(format!("Invalid token: {}", err)),
        }
    }
}

impl From<MembershipError> for ApiError {
    fn from(err: MembershipError) -> Self {
        use MembershipError as E;

        match err {
            E::Database(e) => e.into(),
            E::FreePlanMissing | E::NoPlan => ApiError::ServiceUnavailable(err.to_string()),
            E::InvitationNotFound | E::UserNotFound | E::OrganizationNotFound => {
                ApiError::NotFound(err.to_string())
            }
            E::EmailMismatch
            | E::CannotRemoveSelf
            | E::CannotChangeOwnRole
            | E::CannotChangeAdminRole
            | E::NotInOrganization => ApiError::Forbidden(err.to_string()),
            E::Expired => ApiError::BadRequest(err.to_string()),
            E::AlreadyInOrganization
            | E::DomainTaken(_)
            | E::AlreadyMember(_)
            | E::InvitationExists(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<SeatError> for ApiError {
    fn from(err: SeatError) -> Self {
        MembershipError::from(err).into()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        use LifecycleError as E;

        match err {
            E::Database(e) => e.into(),
            E::OrganizationNotFound | E::PlanNotFound => ApiError::NotFound(err.to_string()),
            E::FreePlanMissing => ApiError::ServiceUnavailable(err.to_string()),
            E::NoCurrentSubscription
            | E::SamePlan(_)
            | E::NotActive(_)
            | E::NotCancelled(_)
            | E::NoPendingDowngrade
            | E::CannotCancelFree
            | E::SeatLimitExceeded { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        ApiError::BadRequest(format!("Invalid webhook signature: {}", err))
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidPayload(e) => {
                ApiError::BadRequest(format!("Invalid webhook payload: {}", e))
            }
            ReconcileError::FreePlanMissing => ApiError::ServiceUnavailable(err.to_string()),
            ReconcileError::Database(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            other => {
                tracing::error!(error = %other, "Payment provider error");
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        tracing::error!(error = %err, "AI provider error");
        ApiError::BadGateway(crate::clients::assistant::CHAT_APOLOGY.to_string())
    }
}
