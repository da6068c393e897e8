//! JWT generation and validation
//!
//! Tokens are HS256 signed and carry only the user ID. Role, organization
//! and permissions are looked up on every request, so a role change or an
//! eviction takes effect immediately instead of when the token expires.
//!
//! # Token Types
//!
//! | Type | Lifetime | Used for |
//! |------|----------|----------|
//! | access | 24 hours | `Authorization: Bearer` on API calls |
//! | refresh | 30 days | obtaining a new access token |
//! | password_reset | 30 minutes | the emailed reset link |
//!
//! Password reset tokens also embed a fingerprint of the password hash they
//! were issued against, which makes them single use: once the password
//! changes, the fingerprint no longer matches.
//!
//! # Example
//!
//! ```
//! use helpdesk_shared::auth::jwt::{create_token, validate_token, Claims, TokenType};
//! use uuid::Uuid;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let user_id = Uuid::new_v4();
//! let token = create_token(&Claims::new(user_id, TokenType::Access), "secret")?;
//! assert_eq!(validate_token(&token, "secret")?.sub, user_id);
//! # Ok(())
//! # }
//! ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Value of the `iss` claim
pub const ISSUER: &str = "helpdesk";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to create token: {0}")]
    CreateError(String),

    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Expected {expected} token, got {actual}")]
    WrongType { expected: &'static str, actual: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    PasswordReset,
}

impl TokenType {
    pub fn default_expiration(&self) -> Duration {
        match self {
            TokenType::Access => Duration::hours(24),
            TokenType::Refresh => Duration::days(30),
            TokenType::PasswordReset => Duration::minutes(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::PasswordReset => "password_reset",
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,

    /// Always [`ISSUER`]
    pub iss: String,

    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,

    pub token_type: TokenType,

    /// Password hash fingerprint, reset tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
}

impl Claims {
    /// Claims with the default lifetime of `token_type`
    pub fn new(user_id: Uuid, token_type: TokenType) -> Self {
        Self::with_expiration(user_id, token_type, token_type.default_expiration())
    }

    pub fn with_expiration(user_id: Uuid, token_type: TokenType, expires_in: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            token_type,
            pwd: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Seconds until expiry, as reported to clients in `expires_in`
    pub fn expires_in_secs(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// Short digest of a password hash, embedded in reset tokens
pub fn password_fingerprint(password_hash: &str) -> String {
    let digest = Sha256::digest(password_hash.as_bytes());
    hex::encode(&digest[..8])
}

/// Signs claims with HS256
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::CreateError(e.to_string()))
}

/// Verifies signature, expiry, not-before and issuer
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                JwtError::InvalidFormat(e.to_string())
            }
            _ => JwtError::ValidationError(e.to_string()),
        })
}

fn validate_typed(token: &str, secret: &str, expected: TokenType) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;
    if claims.token_type != expected {
        return Err(JwtError::WrongType {
            expected: expected.as_str(),
            actual: claims.token_type.as_str(),
        });
    }
    Ok(claims)
}

pub fn create_access_token(user_id: Uuid, secret: &str) -> Result<String, JwtError> {
    create_token(&Claims::new(user_id, TokenType::Access), secret)
}

pub fn create_refresh_token(user_id: Uuid, secret: &str) -> Result<String, JwtError> {
    create_token(&Claims::new(user_id, TokenType::Refresh), secret)
}

pub fn validate_access_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    validate_typed(token, secret, TokenType::Access)
}

pub fn validate_refresh_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    validate_typed(token, secret, TokenType::Refresh)
}

/// Exchanges a refresh token for a new access token for the same user
pub fn refresh_access_token(refresh_token: &str, secret: &str) -> Result<String, JwtError> {
    let claims = validate_refresh_token(refresh_token, secret)?;
    create_access_token(claims.sub, secret)
}

/// Issues a reset token bound to the user's current password hash
pub fn create_password_reset_token(
    user_id: Uuid,
    password_hash: &str,
    secret: &str,
) -> Result<String, JwtError> {
    let mut claims = Claims::new(user_id, TokenType::PasswordReset);
    claims.pwd = Some(password_fingerprint(password_hash));
    create_token(&claims, secret)
}

/// Validates a reset token; the caller must still compare `pwd` with the
/// user's current hash via [`reset_token_matches`]
pub fn validate_password_reset_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    validate_typed(token, secret, TokenType::PasswordReset)
}

/// Whether a reset token was issued against `password_hash`
pub fn reset_token_matches(claims: &Claims, password_hash: &str) -> bool {
    claims.pwd.as_deref() == Some(password_fingerprint(password_hash).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    #[test]
    fn test_token_type_expiration() {
        assert_eq!(TokenType::Access.default_expiration(), Duration::hours(24));
        assert_eq!(TokenType::Refresh.default_expiration(), Duration::days(30));
        assert_eq!(TokenType::PasswordReset.default_expiration(), Duration::minutes(30));
    }

    #[test]
    fn test_access_token_carries_user() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, SECRET).unwrap();

        let claims = validate_access_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, ISSUER);
        assert!(claims.pwd.is_none());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_access_token(Uuid::new_v4(), SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-key-at-least-32-bytes").is_err());
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims::with_expiration(Uuid::new_v4(), TokenType::Access, Duration::seconds(-3600));
        assert!(claims.is_expired());
        assert_eq!(claims.expires_in_secs(), 0);

        let token = create_token(&claims, SECRET).unwrap();
        assert!(matches!(validate_token(&token, SECRET), Err(JwtError::Expired)));
    }

    #[test]
    fn test_garbage_token_is_invalid_format() {
        assert!(matches!(
            validate_token("not.a.jwt", SECRET),
            Err(JwtError::InvalidFormat(_)) | Err(JwtError::ValidationError(_))
        ));
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let user_id = Uuid::new_v4();
        let access = create_access_token(user_id, SECRET).unwrap();
        let refresh = create_refresh_token(user_id, SECRET).unwrap();

        assert!(matches!(
            validate_access_token(&refresh, SECRET),
            Err(JwtError::WrongType { expected: "access", actual: "refresh" })
        ));
        assert!(validate_refresh_token(&access, SECRET).is_err());
        assert!(refresh_access_token(&access, SECRET).is_err());
        assert!(validate_access_token(&create_password_reset_token(user_id, "h", SECRET).unwrap(), SECRET).is_err());
    }

    #[test]
    fn test_refresh_issues_access_for_same_user() {
        let user_id = Uuid::new_v4();
        let refresh = create_refresh_token(user_id, SECRET).unwrap();

        let access = refresh_access_token(&refresh, SECRET).unwrap();
        assert_eq!(validate_access_token(&access, SECRET).unwrap().sub, user_id);
    }

    #[test]
    fn test_reset_token_is_bound_to_password_hash() {
        let user_id = Uuid::new_v4();
        let token = create_password_reset_token(user_id, "$argon2id$old", SECRET).unwrap();

        let claims = validate_password_reset_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id);
        assert!(reset_token_matches(&claims, "$argon2id$old"));
        assert!(!reset_token_matches(&claims, "$argon2id$new"));
    }
}
