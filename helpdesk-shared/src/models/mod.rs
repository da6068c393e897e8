//! Database models for the helpdesk
//!
//! Every model exposes its queries as associated functions generic over
//! [`sqlx::PgExecutor`], so the same call works against a pool or inside a
//! caller-owned transaction.
//!
//! # Models
//!
//! - `plan`: static subscription plan catalog
//! - `organization`: tenants, with plan and subscription pointers
//! - `user`: accounts, roles and organization membership
//! - `subscription`: time-bounded plan associations
//! - `feedback`: cancellation feedback
//! - `invitation`: token based offers to join an organization
//! - `ticket`: support tickets, filters and dashboard statistics
//! - `ticket_response`: replies on a ticket
//! - `ticket_comment`: public and internal notes on a ticket
//! - `email_job`: outbox rows drained by the worker
//! - `webhook_event`: ledger of processed payment provider events
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_shared::models::plan::Plan;
//! use helpdesk_shared::db::pool::{create_pool, DatabaseConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool(DatabaseConfig::from_url("postgresql://localhost/helpdesk")).await?;
//! for plan in Plan::list_active(&pool).await? {
//!     println!("{}: {} seats", plan.name, plan.team_size_limit);
//! }
//! # Ok(())
//! # }
//! ```

pub mod email_job;
pub mod feedback;
pub mod invitation;
pub mod organization;
pub mod plan;
pub mod subscription;
pub mod ticket;
pub mod ticket_comment;
pub mod ticket_response;
pub mod user;
pub mod webhook_event;
