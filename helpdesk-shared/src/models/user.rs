//! User model and database operations
//!
//! Users belong to at most one organization. A user without an organization
//! can still sign in, accept invitations, or create an organization of their own.
//!
//! # Schema
//!
//! ```sql
//! CREATE TYPE user_role AS ENUM ('user', 'staff', 'admin');
//!
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     username VARCHAR(64) NOT NULL UNIQUE,
//!     email VARCHAR(120) NOT NULL UNIQUE,
//!     password_hash TEXT NOT NULL,
//!     role user_role NOT NULL DEFAULT 'user',
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     organization_id UUID REFERENCES organizations(id) ON DELETE SET NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     last_sign_in_at TIMESTAMPTZ
//! );
//! ```
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::models::user::{CreateUser, User};
//! use helpdesk_shared::db::pool::{create_pool, DatabaseConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool(DatabaseConfig::default()).await?;
//!
//! let user = User::create(&pool, CreateUser {
//!     username: "jdoe".to_string(),
//!     email: "jdoe@example.com".to_string(),
//!     password_hash: "$argon2id$...".to_string(),
//! }).await?;
//!
//! let found = User::find_by_email(&pool, "jdoe@example.com").await?;
//! assert!(found.is_some());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::str::FromStr;
use uuid::Uuid;

/// Role of a user inside their organization
///
/// Roles are flat: `staff` is not a superset of `user` in storage, the
/// capabilities of each role are resolved through
/// [`crate::auth::authorization::PermissionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular member: submits and follows their own tickets
    User,

    /// Support staff: works every ticket of the organization
    Staff,

    /// Organization administrator: staff powers plus members and billing
    Admin,
}

impl Role {
    /// Converts role to string for display
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    /// Staff and admins both work the support queue
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Unique login name shown on tickets
    pub username: String,

    /// Unique email address, matched against invitations
    pub email: String,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Role inside the organization
    pub role: Role,

    /// Inactive users cannot sign in and are not assigned tickets
    pub is_active: bool,

    /// Organization the user belongs to, if any
    pub organization_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Last successful sign in
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,
}

/// Public projection of a user, safe to return from the API
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemberSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl From<&User> for MemberSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            last_sign_in_at: user.last_sign_in_at,
        }
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_active, organization_id, \
                            created_at, updated_at, last_sign_in_at";

impl User {
    /// Creates a new unaffiliated user with the default `user` role
    ///
    /// # Errors
    ///
    /// Returns an error if the email or username is already taken
    /// (unique constraint violation) or the database is unreachable.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash)
             VALUES ($1, $2, $3)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(data.username)
        .bind(data.email.to_lowercase())
        .bind(data.password_hash)
        .fetch_one(executor)
        .await
    }

    /// Finds a user by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds a user by ID and locks the row for the rest of the transaction
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Finds a user by email address (case-insensitive)
    pub async fn find_by_email<'e, E>(executor: E, email: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.to_lowercase())
        .fetch_optional(executor)
        .await
    }

    /// Finds a member of the given organization by email
    pub async fn find_member_by_email<'e, E>(
        executor: E,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND organization_id = $2"
        ))
        .bind(email.to_lowercase())
        .bind(organization_id)
        .fetch_optional(executor)
        .await
    }

    /// Moves a user into an organization with the given role
    pub async fn join_organization<'e, E>(
        executor: E,
        id: Uuid,
        organization_id: Uuid,
        role: Role,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users
             SET organization_id = $2, role = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(organization_id)
        .bind(role)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Detaches users from their organization and resets them to the `user` role
    ///
    /// Returns the number of users detached.
    pub async fn leave_organization<'e, E>(executor: E, ids: &[Uuid]) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users
             SET organization_id = NULL, role = 'user', updated_at = NOW()
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Changes the role of a user
    pub async fn update_role<'e, E>(executor: E, id: Uuid, role: Role) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(role)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces the stored password hash
    pub async fn update_password<'e, E>(
        executor: E,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a successful sign in
    pub async fn update_last_sign_in<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET last_sign_in_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists members of an organization, newest first
    pub async fn list_by_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE organization_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(organization_id)
        .fetch_all(executor)
        .await
    }

    /// Active staff and admins of an organization in stable creation order
    ///
    /// This is the round-robin roster used for ticket assignment.
    pub async fn staff_roster<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE organization_id = $1
               AND role IN ('staff', 'admin')
               AND is_active = TRUE
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(organization_id)
        .fetch_all(executor)
        .await
    }

    /// Counts every member of an organization
    pub async fn count_by_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_one(executor)
                .await?;

        Ok(count)
    }

    /// Counts active members of an organization
    pub async fn count_active_by_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
    ) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE organization_id = $1 AND is_active = TRUE",
        )
        .bind(organization_id)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }

    /// Deletes a user
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
