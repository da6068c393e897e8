//! # Helpdesk Worker
//!
//! Drains the email outbox over SMTP and activates scheduled subscriptions
//! when their start date passes. Several workers may run against the same
//! database.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p helpdesk-worker
//! ```

use helpdesk_shared::db::pool::{create_pool, DatabaseConfig};
use helpdesk_worker::{
    config::WorkerConfig,
    mailer::SmtpMailer,
    orchestrator::{OrchestratorConfig, WorkerOrchestrator},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helpdesk_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Helpdesk Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = WorkerConfig::load()?;

    let pool = create_pool(
        DatabaseConfig::from_url(config.database_url.clone())
            .with_max_connections(config.max_connections),
    )
    .await?;

    let mailer = SmtpMailer::new(&config.mail)?;
    if let Err(e) = mailer.verify_connection().await {
        // Jobs stay queued and are retried until the relay comes back
        tracing::warn!(error = %e, "SMTP relay is not reachable");
    }

    let orchestrator = WorkerOrchestrator::with_config(
        pool,
        Arc::new(mailer),
        OrchestratorConfig {
            poll_interval_secs: config.poll_interval_secs,
            batch_size: config.batch_size,
            retry_base_secs: config.retry_base_secs,
            max_concurrent_sends: config.max_concurrent_sends,
            ..OrchestratorConfig::default()
        },
    );

    let shutdown_token = orchestrator.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing current batch...");
                shutdown_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    tracing::info!("Worker ready and polling the outbox");
    orchestrator.run().await
}
