//! Configuration for the API server
//!
//! Everything is read from environment variables once at start-up. A
//! `.env` file in the working directory is loaded first when present.
//!
//! # Environment Variables
//!
//! - `API_HOST` / `API_PORT`: bind address (default `0.0.0.0:8080`)
//! - `API_PRODUCTION`: enables HSTS (default `false`)
//! - `CORS_ORIGINS`: comma separated origins, `*` for any (default `*`)
//! - `PUBLIC_URL`: base URL used in emailed links
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
//! - `JWT_SECRET`: HS256 signing secret, at least 32 characters (required)
//! - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_PUBLIC_KEY`, `STRIPE_API_BASE`
//! - `OPENAI_API_KEY`, `OPENAI_API_BASE`, `OPENAI_MODEL`
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_api::config::Config;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! println!("Server will listen on {}", config.bind_address());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::env;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub openai: OpenAiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Adds `Strict-Transport-Security` to every response
    pub production: bool,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Externally reachable base URL, without a trailing slash
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 signing secret
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

/// Payment provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,

    /// Endpoint secret used to verify webhook signatures
    pub webhook_secret: String,

    pub public_key: String,
    pub api_base: String,
}

/// Chat completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Splits a comma separated list, dropping empty entries
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a number does not
    /// parse, or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = var_or("API_PORT", "8080").parse::<u16>()?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = var_or("DATABASE_MAX_CONNECTIONS", "10").parse::<u32>()?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        Ok(Self {
            api: ApiConfig {
                host: var_or("API_HOST", "0.0.0.0"),
                port,
                production: parse_bool(&var_or("API_PRODUCTION", "false")),
                cors_origins: parse_list(&var_or("CORS_ORIGINS", "*")),
                public_url: var_or("PUBLIC_URL", "http://localhost:8080")
                    .trim_end_matches('/')
                    .to_string(),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            jwt: JwtConfig { secret: jwt_secret },
            stripe: StripeConfig {
                secret_key: var_or("STRIPE_SECRET_KEY", ""),
                webhook_secret: var_or("STRIPE_WEBHOOK_SECRET", ""),
                public_key: var_or("STRIPE_PUBLIC_KEY", ""),
                api_base: var_or("STRIPE_API_BASE", "https://api.stripe.com"),
            },
            openai: OpenAiConfig {
                api_key: var_or("OPENAI_API_KEY", ""),
                api_base: var_or("OPENAI_API_BASE", "https://api.openai.com"),
                model: var_or("OPENAI_MODEL", "gpt-3.5-turbo"),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}
