//! Invitation model and database operations
//!
//! An invitation is a random token that lets the owner of one email address
//! join an organization. Invitations are hard-deleted once accepted,
//! declined or cancelled; expired and accepted rows are also purged before a
//! new invitation is issued for the same address.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE invitations (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     email VARCHAR(120) NOT NULL,
//!     organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
//!     token VARCHAR(100) NOT NULL UNIQUE,
//!     is_admin_invite BOOLEAN NOT NULL DEFAULT FALSE,
//!     accepted BOOLEAN NOT NULL DEFAULT FALSE,
//!     accepted_at TIMESTAMPTZ,
//!     expires_at TIMESTAMPTZ NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// How long an invitation stays valid
pub const INVITATION_TTL_DAYS: i64 = 7;

/// Random bytes in an invitation token (hex encoded, so twice as many chars)
const TOKEN_BYTES: usize = 32;

/// Invitation row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,

    /// Invitee address, stored lowercase
    pub email: String,

    pub organization_id: Uuid,

    /// Secret token sent to the invitee
    #[serde(skip_serializing)]
    pub token: String,

    /// Accepting grants the `admin` role instead of `user`
    pub is_admin_invite: bool,

    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Invitation joined with its organization name, for the invitee's inbox
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingInvitation {
    pub token: String,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub is_admin_invite: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for issuing an invitation
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub organization_id: Uuid,
    pub is_admin_invite: bool,
}

/// Generates a new URL-safe invitation token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Expiry for an invitation issued (or resent) at `now`
pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(INVITATION_TTL_DAYS)
}

const INVITATION_COLUMNS: &str = "id, email, organization_id, token, is_admin_invite, accepted, \
                                  accepted_at, expires_at, created_at";

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Unexpired and not yet accepted
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.accepted && !self.is_expired(now)
    }

    /// Whether the invitation is addressed to `email`
    pub fn is_for(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }

    /// Issues a new invitation with a fresh token and a 7-day expiry
    pub async fn create<'e, E>(
        executor: E,
        data: NewInvitation,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(&format!(
            "INSERT INTO invitations (email, organization_id, token, is_admin_invite, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(data.email.trim().to_lowercase())
        .bind(data.organization_id)
        .bind(generate_token())
        .bind(data.is_admin_invite)
        .bind(expiry_from(now))
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_token<'e, E>(executor: E, token: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(executor)
        .await
    }

    /// Finds an unexpired, unaccepted invitation for `email` in an organization
    pub async fn find_live<'e, E>(
        executor: E,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE organization_id = $1
               AND email = $2
               AND accepted = FALSE
               AND expires_at > $3
             LIMIT 1"
        ))
        .bind(organization_id)
        .bind(email.trim().to_lowercase())
        .bind(now)
        .fetch_optional(executor)
        .await
    }

    /// Deletes expired or accepted invitations for `email` in an organization
    pub async fn purge_stale<'e, E>(
        executor: E,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "DELETE FROM invitations
             WHERE organization_id = $1
               AND email = $2
               AND (accepted = TRUE OR expires_at <= $3)",
        )
        .bind(organization_id)
        .bind(email.trim().to_lowercase())
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Live invitations addressed to `email`, across organizations
    pub async fn list_pending_for_email<'e, E>(
        executor: E,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingInvitation>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, PendingInvitation>(
            "SELECT i.token, i.organization_id, o.name AS organization_name,
                    i.is_admin_invite, i.expires_at, i.created_at
             FROM invitations i
             JOIN organizations o ON o.id = i.organization_id
             WHERE i.email = $1 AND i.accepted = FALSE AND i.expires_at > $2
             ORDER BY i.created_at DESC",
        )
        .bind(email.trim().to_lowercase())
        .bind(now)
        .fetch_all(executor)
        .await
    }

    /// Live invitations issued by an organization
    pub async fn list_pending_for_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE organization_id = $1 AND accepted = FALSE AND expires_at > $2
             ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(now)
        .fetch_all(executor)
        .await
    }

    /// Pushes the expiry out to `expires_at`
    pub async fn extend<'e, E>(
        executor: E,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE invitations SET expires_at = $2 WHERE id = $1")
            .bind(id)
            .bind(expires_at)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(expires_at: DateTime<Utc>, accepted: bool) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            email: "new.hire@acme.com".to_string(),
            organization_id: Uuid::new_v4(),
            token: generate_token(),
            is_admin_invite: false,
            accepted,
            accepted_at: None,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_token_is_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_is_seven_days() {
        let now = Utc::now();
        assert_eq!(expiry_from(now) - now, Duration::days(7));
    }

    #[test]
    fn test_liveness() {
        let now = Utc::now();
        assert!(invitation(now + Duration::hours(1), false).is_live(now));
        assert!(!invitation(now - Duration::seconds(1), false).is_live(now));
        assert!(!invitation(now + Duration::hours(1), true).is_live(now));
    }

    #[test]
    fn test_is_for_ignores_case() {
        let inv = invitation(Utc::now(), false);
        assert!(inv.is_for("New.Hire@ACME.com"));
        assert!(!inv.is_for("someone@acme.com"));
    }
}
