//! # Helpdesk Shared Library
//!
//! Domain types and rules shared by the helpdesk API server and the
//! background worker.
//!
//! ## Module Organization
//!
//! - `db`: connection pool, migrations and transaction-scoped locks
//! - `models`: database models and queries
//! - `auth`: passwords, JWTs, request authentication and permissions
//! - `membership`: organization creation and invitations
//! - `seats`: per-plan seat enforcement
//! - `assignment`: round-robin ticket assignment
//! - `billing`: subscription lifecycle and payment webhook reconciliation
//! - `outbox`: queueing transactional email for the worker

pub mod assignment;
pub mod auth;
pub mod billing;
pub mod db;
pub mod membership;
pub mod models;
pub mod outbox;
pub mod seats;

/// Current version of the helpdesk shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
