//! Worker configuration
//!
//! Built with the `config` crate from defaults overlaid with environment
//! variables. A `.env` file is loaded first when present.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DATABASE_MAX_CONNECTIONS`: pool size (default 5)
//! - `MAIL_SERVER` / `MAIL_PORT`: SMTP relay (default `smtp.googlemail.com:587`)
//! - `MAIL_USE_TLS`: STARTTLS, or implicit TLS on port 465 (default `true`)
//! - `MAIL_USERNAME` / `MAIL_PASSWORD`: SMTP credentials
//! - `MAIL_DEFAULT_SENDER`: `From` address (default `no-reply@helpdesk.local`)
//! - `WORKER_POLL_INTERVAL_SECS`: idle poll interval (default 5)
//! - `WORKER_BATCH_SIZE`: jobs claimed per poll (default 10)
//! - `WORKER_RETRY_BASE_SECS`: first retry delay, doubled per attempt (default 30)
//! - `WORKER_MAX_CONCURRENT_SENDS`: parallel SMTP sends (default 4)

use serde::Deserialize;

/// SMTP relay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub mail: MailSettings,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub retry_base_secs: i64,
    pub max_concurrent_sends: usize,
}

/// Flat view of the environment, keyed by lowercased variable name
#[derive(Debug, Deserialize)]
struct RawSettings {
    database_url: Option<String>,
    database_max_connections: u32,
    mail_server: String,
    mail_port: u16,
    mail_use_tls: bool,
    mail_username: Option<String>,
    mail_password: Option<String>,
    mail_default_sender: String,
    worker_poll_interval_secs: u64,
    worker_batch_size: usize,
    worker_retry_base_secs: i64,
    worker_max_concurrent_sends: usize,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl WorkerConfig {
    /// Loads configuration from the process environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    /// Loads configuration from defaults overlaid with `source`
    pub fn from_source<S>(source: S) -> anyhow::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .set_default("database_max_connections", 5)?
            .set_default("mail_server", "smtp.googlemail.com")?
            .set_default("mail_port", 587)?
            .set_default("mail_use_tls", true)?
            .set_default("mail_default_sender", "no-reply@helpdesk.local")?
            .set_default("worker_poll_interval_secs", 5)?
            .set_default("worker_batch_size", 10)?
            .set_default("worker_retry_base_secs", 30)?
            .set_default("worker_max_concurrent_sends", 4)?
            .add_source(source)
            .build()?;

        let raw: RawSettings = settings.try_deserialize()?;

        let database_url = non_empty(raw.database_url)
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        if raw.worker_batch_size == 0 {
            anyhow::bail!("WORKER_BATCH_SIZE must be at least 1");
        }
        if raw.worker_retry_base_secs <= 0 {
            anyhow::bail!("WORKER_RETRY_BASE_SECS must be positive");
        }

        Ok(Self {
            database_url,
            max_connections: raw.database_max_connections,
            mail: MailSettings {
                server: raw.mail_server,
                port: raw.mail_port,
                use_tls: raw.mail_use_tls,
                username: non_empty(raw.mail_username),
                password: non_empty(raw.mail_password),
                default_sender: raw.mail_default_sender,
            },
            poll_interval_secs: raw.worker_poll_interval_secs.max(1),
            batch_size: raw.worker_batch_size,
            retry_base_secs: raw.worker_retry_base_secs,
            max_concurrent_sends: raw.worker_max_concurrent_sends.max(1),
        })
    }
}
