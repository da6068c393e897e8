/// Email outbox queue
///
/// Claims due jobs from `email_jobs` and records the outcome of each
/// delivery attempt.
///
/// # Claiming
///
/// Due `pending` jobs are moved to `sending` in one statement using
/// `FOR UPDATE SKIP LOCKED`, so several workers can drain the outbox
/// without sending a message twice. Claiming counts as an attempt.
///
/// A job left in `sending` by a worker that died mid-delivery is claimed
/// again once its lease has run out.
///
/// # Retry
///
/// A failed attempt puts the job back to `pending` with `run_at` pushed out
/// by `retry_base * 2^(attempts - 1)`. Once `max_attempts` is reached the
/// job becomes `failed` and keeps its `last_error` for admins to inspect.
///
/// # Example
///
/// ```no_run
/// use helpdesk_worker::queue::EmailQueue;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = EmailQueue::new(pool);
///
/// for job in queue.claim_due(None).await? {
///     println!("Sending {} to {}", job.subject, job.recipient);
///     queue.mark_sent(job.id).await?;
/// }
/// # Ok(())
/// # }
/// ```

use chrono::Duration;
use helpdesk_shared::models::email_job::{EmailJob, EmailJobStatus};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// How long a claimed job may stay in `sending` before it is reclaimed
pub const SENDING_LEASE_SECS: i64 = 600;

/// Cap on the backoff exponent
const MAX_BACKOFF_EXPONENT: u32 = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Email job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `pending`, due again after the delay
    Retrying { delay: Duration },

    /// Attempts exhausted
    Failed,
}

/// Delay before the next attempt of a job that has made `attempts` attempts
pub fn retry_delay(base: Duration, attempts: i32) -> Duration {
    let exponent = (attempts.max(1) - 1).min(MAX_BACKOFF_EXPONENT as i32) as u32;
    base * 2_i32.pow(exponent)
}

#[derive(Clone)]
pub struct EmailQueue {
    db: PgPool,

    /// Maximum jobs to claim in one batch
    batch_size: usize,

    /// Delay before the first retry
    retry_base: Duration,
}

impl EmailQueue {
    pub fn new(db: PgPool) -> Self {
        Self::with_settings(db, 10, 30)
    }

    pub fn with_settings(db: PgPool, batch_size: usize, retry_base_secs: i64) -> Self {
        EmailQueue {
            db,
            batch_size,
            retry_base: Duration::seconds(retry_base_secs),
        }
    }

    /// Claims jobs that are due, oldest first
    ///
    /// `limit` defaults to the batch size.
    pub async fn claim_due(&self, limit: Option<usize>) -> Result<Vec<EmailJob>, QueueError> {
        let limit = limit.unwrap_or(self.batch_size) as i64;

        let jobs = sqlx::query_as::<_, EmailJob>(
            r#"
            WITH due AS (
                SELECT id
                FROM email_jobs
                WHERE (status = $1 AND run_at <= NOW())
                   OR (status = $2 AND updated_at <= NOW() - make_interval(secs => $3))
                ORDER BY run_at ASC, created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            UPDATE email_jobs
            SET
                status = $2,
                attempts = email_jobs.attempts + 1,
                updated_at = NOW()
            FROM due
            WHERE email_jobs.id = due.id
            RETURNING email_jobs.*
            "#,
        )
        .bind(EmailJobStatus::Pending)
        .bind(EmailJobStatus::Sending)
        .bind(SENDING_LEASE_SECS as f64)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Claimed email jobs");
        }

        Ok(jobs)
    }

    /// Number of jobs waiting to be sent
    pub async fn pending_count(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM email_jobs WHERE status = $1")
            .bind(EmailJobStatus::Pending)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    pub async fn mark_sent(&self, job_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET
                status = $2,
                sent_at = NOW(),
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(job_id)
        .bind(EmailJobStatus::Sent)
        .bind(EmailJobStatus::Sending)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_invalid(job_id, "sent").await);
        }

        tracing::info!(email_job_id = %job_id, "Email sent");
        Ok(())
    }

    /// Records a failed attempt, scheduling a retry or giving up
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<FailureOutcome, QueueError> {
        let job = EmailJob::find_by_id(&self.db, job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;

        if job.status != EmailJobStatus::Sending {
            return Err(QueueError::InvalidStateTransition(format!(
                "cannot fail email job {} in status {:?}",
                job_id, job.status
            )));
        }

        let outcome = if job.attempts >= job.max_attempts {
            FailureOutcome::Failed
        } else {
            FailureOutcome::Retrying {
                delay: retry_delay(self.retry_base, job.attempts),
            }
        };

        let (status, delay_secs) = match outcome {
            FailureOutcome::Failed => (EmailJobStatus::Failed, 0.0),
            FailureOutcome::Retrying { delay } => (EmailJobStatus::Pending, delay.num_seconds() as f64),
        };

        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET
                status = $2,
                last_error = $3,
                run_at = NOW() + make_interval(secs => $4),
                updated_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(error)
        .bind(delay_secs)
        .bind(EmailJobStatus::Sending)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_invalid(job_id, "failed").await);
        }

        match outcome {
            FailureOutcome::Failed => tracing::error!(
                email_job_id = %job_id,
                attempts = job.attempts,
                error = %error,
                "Email delivery failed permanently"
            ),
            FailureOutcome::Retrying { delay } => tracing::warn!(
                email_job_id = %job_id,
                attempts = job.attempts,
                retry_in_secs = delay.num_seconds(),
                error = %error,
                "Email delivery failed, will retry"
            ),
        }

        Ok(outcome)
    }

    async fn missing_or_invalid(&self, job_id: Uuid, target: &str) -> QueueError {
        match EmailJob::find_by_id(&self.db, job_id).await {
            Ok(Some(job)) => QueueError::InvalidStateTransition(format!(
                "cannot mark email job {} {} from status {:?}",
                job_id, target, job.status
            )),
            Ok(None) => QueueError::JobNotFound(job_id),
            Err(e) => QueueError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::seconds(30);
        assert_eq!(retry_delay(base, 1), Duration::seconds(30));
        assert_eq!(retry_delay(base, 2), Duration::seconds(60));
        assert_eq!(retry_delay(base, 3), Duration::seconds(120));
        assert_eq!(retry_delay(base, 5), Duration::seconds(480));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::seconds(30);
        assert_eq!(retry_delay(base, 11), retry_delay(base, 40));
        assert_eq!(retry_delay(base, 0), base);
    }
}
