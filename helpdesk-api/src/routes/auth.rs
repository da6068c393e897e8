//! Account endpoints
//!
//! - `POST /v1/auth/register`: create an unaffiliated account
//! - `POST /v1/auth/login`: exchange credentials for tokens
//! - `POST /v1/auth/refresh`: exchange a refresh token for an access token
//! - `POST /v1/auth/forgot-password`: queue a password reset email
//! - `POST /v1/auth/reset-password`: set a new password with a reset token
//! - `GET  /v1/auth/me`: the caller's account and permissions
//! - `POST /v1/auth/change-password`: change the caller's password
//!
//! Reset tokens embed a fingerprint of the password hash they were issued
//! against, so a token stops working once the password changes.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use helpdesk_shared::{
    auth::{
        authorization::Permission,
        jwt::{self, TokenType},
        middleware::AuthContext,
        password,
    },
    models::user::{CreateUser, User},
    outbox,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be between 3 and 64 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Tokens issued on register and login
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,

    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn check_strength(new_password: &str) -> ApiResult<()> {
    password::validate_password_strength(new_password)
        .map_err(|e| ApiError::invalid_field("password", e))
}

fn issue_tokens(state: &AppState, user: User) -> ApiResult<AuthResponse> {
    let access_token = jwt::create_access_token(user.id, state.jwt_secret())?;
    let refresh_token = jwt::create_refresh_token(user.id, state.jwt_secret())?;

    Ok(AuthResponse {
        user,
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: TokenType::Access.default_expiration().num_seconds(),
    })
}

/// Creates an account with the `user` role and no organization
///
/// # Errors
///
/// - `422`: invalid username, email or weak password
/// - `409`: email or username already taken
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    check_strength(&req.password)?;

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_string(),
            password_hash,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((StatusCode::CREATED, Json(issue_tokens(&state, user)?)))
}

/// # Errors
///
/// - `401`: unknown email, wrong password or disabled account
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        return Err(invalid());
    }

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".to_string()));
    }

    User::update_last_sign_in(&state.db, user.id).await?;

    Ok(Json(issue_tokens(&state, user)?))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let access_token = jwt::refresh_access_token(&req.refresh_token, state.jwt_secret())?;
    Ok(Json(RefreshResponse { access_token }))
}

pub async fn me(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<MeResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(MeResponse {
        user,
        permissions: auth.permissions.iter().collect(),
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !password::verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::invalid_field(
            "current_password",
            "Current password is incorrect",
        ));
    }
    check_strength(&req.new_password)?;

    let hash = password::hash_password(&req.new_password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    tracing::info!(user_id = %user.id, "Password changed");

    Ok(Json(MessageResponse {
        message: "Your password has been updated.".to_string(),
    }))
}

/// Queues a reset link when the email belongs to an active account
///
/// The response is the same whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    req.validate()?;

    if let Some(user) = User::find_by_email(&state.db, req.email.trim()).await? {
        if user.is_active {
            let token =
                jwt::create_password_reset_token(user.id, &user.password_hash, state.jwt_secret())?;
            let reset_url = state.public_url(&format!("/reset-password?token={}", token));

            let job = outbox::queue(&state.db, outbox::password_reset_email(&user.email, &reset_url))
                .await?;
            tracing::info!(user_id = %user.id, job_id = %job.id, "Password reset email queued");
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Check your email for the instructions to reset your password".to_string(),
        }),
    ))
}

/// # Errors
///
/// - `401`: invalid, expired or already used token
/// - `422`: weak password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let claims = jwt::validate_password_reset_token(&req.token, state.jwt_secret())?;

    let stale = || ApiError::Unauthorized("Reset link is no longer valid".to_string());
    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(stale)?;
    if !jwt::reset_token_matches(&claims, &user.password_hash) {
        return Err(stale());
    }

    check_strength(&req.new_password)?;

    let hash = password::hash_password(&req.new_password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    tracing::info!(user_id = %user.id, "Password reset");

    Ok(Json(MessageResponse {
        message: "Your password has been reset.".to_string(),
    }))
}
