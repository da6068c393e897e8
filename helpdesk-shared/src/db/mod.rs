//! Database layer for the helpdesk
//!
//! - `pool`: PostgreSQL connection pool with a start-up health check
//! - `migrations`: embedded migration runner and status queries
//! - `lock`: transaction-scoped advisory locks
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::db::pool::{create_pool, DatabaseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool(DatabaseConfig::from_url(std::env::var("DATABASE_URL")?)).await?;
//!     helpdesk_shared::db::migrations::run_migrations(&pool).await?;
//!     Ok(())
//! }
//! ```

pub mod lock;
pub mod migrations;
pub mod pool;
