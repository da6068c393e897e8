//! Email outbox rows
//!
//! Requests never talk to the mail server. They insert an `email_jobs` row,
//! usually inside the same transaction as the change that caused the email,
//! and the worker delivers it later.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──claim──► sending ──ok──► sent
//!    ▲                  │
//!    └──retry (backoff)─┤
//!                       └──attempts exhausted──► failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailJobStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

/// Outbox row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailJob {
    pub id: Uuid,

    /// Organization the email concerns, for failure visibility
    pub organization_id: Option<Uuid>,

    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub status: EmailJobStatus,

    /// Delivery attempts made so far
    pub attempts: i32,

    /// Attempts allowed before the job is marked failed
    pub max_attempts: i32,

    /// Error from the most recent failed attempt
    pub last_error: Option<String>,

    /// Earliest time the next attempt may run
    pub run_at: DateTime<Utc>,

    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message ready to be queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmail {
    pub organization_id: Option<Uuid>,
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

pub const EMAIL_JOB_COLUMNS: &str = "id, organization_id, recipient, subject, text_body, html_body, \
                                     status, attempts, max_attempts, last_error, run_at, sent_at, \
                                     created_at, updated_at";

impl EmailJob {
    /// Queues a message for immediate delivery
    pub async fn enqueue<'e, E>(executor: E, email: NewEmail) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let job = sqlx::query_as::<_, EmailJob>(&format!(
            "INSERT INTO email_jobs (organization_id, recipient, subject, text_body, html_body)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {EMAIL_JOB_COLUMNS}"
        ))
        .bind(email.organization_id)
        .bind(email.recipient)
        .bind(email.subject)
        .bind(email.text_body)
        .bind(email.html_body)
        .fetch_one(executor)
        .await?;

        tracing::debug!(email_job_id = %job.id, subject = %job.subject, "Email queued");
        Ok(job)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, EmailJob>(&format!(
            "SELECT {EMAIL_JOB_COLUMNS} FROM email_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Jobs of an organization that gave up after exhausting their attempts
    pub async fn list_failed_for_organization<'e, E>(
        executor: E,
        organization_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, EmailJob>(&format!(
            "SELECT {EMAIL_JOB_COLUMNS} FROM email_jobs
             WHERE organization_id = $1 AND status = 'failed'
             ORDER BY updated_at DESC
             LIMIT $2"
        ))
        .bind(organization_id)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Every job addressed to `recipient`, newest first
    pub async fn list_for_recipient<'e, E>(
        executor: E,
        recipient: &str,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, EmailJob>(&format!(
            "SELECT {EMAIL_JOB_COLUMNS} FROM email_jobs
             WHERE recipient = $1
             ORDER BY created_at DESC"
        ))
        .bind(recipient)
        .fetch_all(executor)
        .await
    }
}
