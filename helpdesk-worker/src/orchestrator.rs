/// Worker orchestrator
///
/// The main loop of the worker. Each tick it:
///
/// ```text
/// Orchestrator
///   ├─> EmailQueue: claim due outbox jobs
///   ├─> EmailProvider: send them, a few at a time
///   ├─> EmailQueue: mark sent / schedule retry / mark failed
///   └─> lifecycle::activate_due: start scheduled subscriptions
/// ```
///
/// When a tick finds no email, the loop sleeps for the poll interval. It
/// stops at the next tick boundary once the shutdown token is cancelled.
///
/// # Example
///
/// ```no_run
/// use helpdesk_worker::{config::MailSettings, mailer::SmtpMailer, orchestrator::WorkerOrchestrator};
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example(pool: PgPool, mail: MailSettings) -> anyhow::Result<()> {
/// let mailer = Arc::new(SmtpMailer::new(&mail)?);
/// let orchestrator = WorkerOrchestrator::new(pool, mailer);
///
/// orchestrator.run().await?;
/// # Ok(())
/// # }
/// ```

use crate::mailer::{EmailProvider, OutgoingEmail};
use crate::queue::{EmailQueue, FailureOutcome};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use helpdesk_shared::billing::lifecycle;
use helpdesk_shared::models::email_job::EmailJob;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sleep between ticks that found no email
    pub poll_interval_secs: u64,

    /// Outbox jobs claimed per tick
    pub batch_size: usize,

    /// Delay before the first retry of a failed send
    pub retry_base_secs: i64,

    /// Parallel SMTP sends within a batch
    pub max_concurrent_sends: usize,

    /// Organizations checked for due scheduled subscriptions per tick
    pub activation_batch_size: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            poll_interval_secs: 5,
            batch_size: 10,
            retry_base_secs: 30,
            max_concurrent_sends: 4,
            activation_batch_size: 50,
        }
    }
}

/// Counts from one pass over the outbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn total(&self) -> usize {
        self.sent + self.retrying + self.failed
    }
}

pub struct WorkerOrchestrator {
    db: PgPool,
    queue: EmailQueue,
    mailer: Arc<dyn EmailProvider>,
    config: OrchestratorConfig,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(db: PgPool, mailer: Arc<dyn EmailProvider>) -> Self {
        Self::with_config(db, mailer, OrchestratorConfig::default())
    }

    pub fn with_config(
        db: PgPool,
        mailer: Arc<dyn EmailProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let queue = EmailQueue::with_settings(db.clone(), config.batch_size, config.retry_base_secs);

        WorkerOrchestrator {
            db,
            queue,
            mailer,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Used to signal graceful shutdown from external handlers
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs until the shutdown token is cancelled
    ///
    /// Database errors are logged and retried on the next tick; the loop
    /// only ends on shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Worker orchestrator starting");

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let report = match self.deliver_batch().await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim email jobs");
                    DeliveryReport::default()
                }
            };

            if let Err(e) = self.activate_subscriptions().await {
                tracing::error!(error = %e, "Failed to activate scheduled subscriptions");
            }

            if report.total() > 0 {
                continue;
            }

            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
            }
        }

        tracing::info!("Worker orchestrator shut down");
        Ok(())
    }

    /// Claims one batch of due email and attempts each job once
    pub async fn deliver_batch(&self) -> anyhow::Result<DeliveryReport> {
        let jobs = self.queue.claim_due(None).await?;

        let outcomes: Vec<Delivery> = stream::iter(jobs)
            .map(|job| deliver(&self.queue, self.mailer.as_ref(), job))
            .buffer_unordered(self.config.max_concurrent_sends.max(1))
            .collect()
            .await;

        let mut report = DeliveryReport::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Sent => report.sent += 1,
                Delivery::Retrying => report.retrying += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Unrecorded => {}
            }
        }

        if report.total() > 0 {
            tracing::info!(
                sent = report.sent,
                retrying = report.retrying,
                failed = report.failed,
                "Email batch processed"
            );
        }

        Ok(report)
    }

    /// Starts scheduled subscriptions whose start date has passed
    pub async fn activate_subscriptions(&self) -> anyhow::Result<usize> {
        let activated =
            lifecycle::activate_due(&self.db, Utc::now(), self.config.activation_batch_size).await?;

        if activated > 0 {
            tracing::info!(count = activated, "Activated scheduled subscriptions");
        }
        Ok(activated)
    }
}

enum Delivery {
    Sent,
    Retrying,
    Failed,

    /// The outcome could not be written; the lease will hand the job out again
    Unrecorded,
}

async fn deliver(queue: &EmailQueue, mailer: &dyn EmailProvider, job: EmailJob) -> Delivery {
    let job_id = job.id;
    tracing::debug!(email_job_id = %job_id, attempt = job.attempts, "Sending email");

    let recorded = match mailer.send(&OutgoingEmail::from(&job)).await {
        Ok(()) => queue.mark_sent(job_id).await.map(|()| Delivery::Sent),
        Err(e) => queue
            .mark_failed(job_id, &e.to_string())
            .await
            .map(|outcome| match outcome {
                FailureOutcome::Retrying { .. } => Delivery::Retrying,
                FailureOutcome::Failed => Delivery::Failed,
            }),
    };

    recorded.unwrap_or_else(|e| {
        tracing::error!(email_job_id = %job_id, error = %e, "Failed to record email outcome");
        Delivery::Unrecorded
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry_base_secs, 30);
        assert_eq!(config.max_concurrent_sends, 4);
    }

    #[test]
    fn test_delivery_report_total() {
        let report = DeliveryReport {
            sent: 3,
            retrying: 1,
            failed: 2,
        };
        assert_eq!(report.total(), 6);
        assert_eq!(DeliveryReport::default().total(), 0);
    }
}
