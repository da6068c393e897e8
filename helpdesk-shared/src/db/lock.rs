//! Transaction-scoped advisory locks
//!
//! Subscription writes and ticket assignment serialize per organization by
//! taking `pg_advisory_xact_lock` inside their transaction. The lock is
//! released automatically on commit or rollback.

use sqlx::PgExecutor;
use uuid::Uuid;

/// What an advisory lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Every write to an organization's subscriptions and plan pointers
    Subscription(Uuid),

    /// The round-robin position of an organization's ticket queue
    TicketAssignment(Uuid),
}

impl LockScope {
    /// Stable text key hashed into the 64-bit lock id
    pub fn key(&self) -> String {
        match self {
            LockScope::Subscription(org) => format!("subscription:{}", org),
            LockScope::TicketAssignment(org) => format!("ticket-assignment:{}", org),
        }
    }
}

/// Blocks until the lock for `scope` is held by the current transaction
///
/// Must be called with a transaction connection; on a bare pool connection
/// the lock would be released as soon as the statement finishes.
pub async fn lock_for_transaction<'e, E>(executor: E, scope: LockScope) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(scope.key())
        .execute(executor)
        .await?;

    tracing::trace!(key = %scope.key(), "Advisory lock acquired");
    Ok(())
}
