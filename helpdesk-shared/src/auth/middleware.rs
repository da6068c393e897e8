//! Request authentication for axum
//!
//! [`authenticate`] turns an `Authorization: Bearer <jwt>` header into an
//! [`AuthContext`]. The token only proves who the caller is; role,
//! organization and active flag come from the user row read during the same
//! request, and the permission set is derived from them once.
//!
//! The API server wires this into a `from_fn_with_state` layer that inserts
//! the context into request extensions. Handlers then take `AuthContext` as
//! an extractor argument.
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::auth::middleware::AuthContext;
//!
//! async fn whoami(auth: AuthContext) -> String {
//!     format!("{} ({})", auth.email, auth.role.as_str())
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::authorization::PermissionSet;
use super::jwt::{validate_access_token, JwtError};
use crate::models::user::{Role, User};

/// Authenticated caller, resolved once per request
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,

    /// Organization the caller currently belongs to
    pub organization_id: Option<Uuid>,

    /// Everything the caller may do in this request
    pub permissions: PermissionSet,
}

impl AuthContext {
    pub fn new(user_id: Uuid, email: String, role: Role, organization_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            email,
            role,
            organization_id,
            permissions: PermissionSet::for_role(role, organization_id.is_some()),
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self::new(user.id, user.email.clone(), user.role, user.organization_id)
    }

    /// Staff and admins work the whole ticket queue
    pub fn is_staff(&self) -> bool {
        self.organization_id.is_some() && self.role.is_staff()
    }
}

/// Authentication failure
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidToken(String),

    #[error("Account is disabled")]
    Inactive,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
            JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
            other => AuthError::InvalidToken(format!("Invalid token: {}", other)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MissingCredentials | AuthError::InvalidToken(_) | AuthError::Inactive => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            AuthError::InvalidFormat(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AuthError::DatabaseError(e) => {
                tracing::error!(error = %e, "Database error during authentication");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            AuthError::DatabaseError(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

/// Extracts the token from an `Authorization` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingCredentials)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))
}

/// Validates the bearer token and loads the caller's current user row
///
/// # Errors
///
/// - [`AuthError::MissingCredentials`] / [`AuthError::InvalidFormat`] for a bad header
/// - [`AuthError::InvalidToken`] for a bad or expired token, or a deleted user
/// - [`AuthError::Inactive`] for a disabled account
pub async fn authenticate(
    pool: &PgPool,
    secret: &str,
    authorization: Option<&str>,
) -> Result<AuthContext, AuthError> {
    let token = bearer_token(authorization)?;
    let claims = validate_access_token(token, secret)?;

    let user = User::find_by_id(pool, claims.sub)
        .await?
        .ok_or_else(|| AuthError::InvalidToken("User no longer exists".to_string()))?;

    if !user.is_active {
        return Err(AuthError::Inactive);
    }

    Ok(AuthContext::from_user(&user))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authorization::Permission;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingCredentials)));
        assert!(matches!(bearer_token(Some("Basic dXNlcg==")), Err(AuthError::InvalidFormat(_))));
        assert!(matches!(bearer_token(Some("Bearer ")), Err(AuthError::InvalidFormat(_))));
    }

    #[test]
    fn test_context_resolves_permissions() {
        let ctx = AuthContext::new(Uuid::new_v4(), "a@acme.com".into(), Role::Staff, Some(Uuid::new_v4()));
        assert!(ctx.is_staff());
        assert!(ctx.permissions.contains(Permission::ViewAllTickets));

        let detached = AuthContext::new(Uuid::new_v4(), "b@acme.com".into(), Role::Staff, None);
        assert!(!detached.is_staff());
        assert!(!detached.permissions.contains(Permission::ViewAllTickets));
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(AuthError::MissingCredentials.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::InvalidFormat("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::Inactive.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_expired_jwt_maps_to_invalid_token() {
        assert!(matches!(AuthError::from(JwtError::Expired), AuthError::InvalidToken(m) if m == "Token expired"));
    }
}
