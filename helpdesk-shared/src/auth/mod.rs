//! Authentication and authorization
//!
//! # Modules
//!
//! - [`password`]: Argon2id password hashing and the password policy
//! - [`jwt`]: access, refresh and password-reset tokens
//! - [`middleware`]: axum layer that turns a bearer token into an [`middleware::AuthContext`]
//! - [`authorization`]: roles mapped to permissions, and tenant checks
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::auth::jwt::{create_access_token, validate_access_token};
//! use helpdesk_shared::auth::password::{hash_password, verify_password};
//! use uuid::Uuid;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = hash_password("Sup3r-secret")?;
//! assert!(verify_password("Sup3r-secret", &hash)?);
//!
//! let secret = "an-hs256-secret-of-at-least-32-bytes!!";
//! let token = create_access_token(Uuid::new_v4(), secret)?;
//! let claims = validate_access_token(&token, secret)?;
//! # Ok(())
//! # }
//! ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
