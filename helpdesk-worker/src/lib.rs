//! # Helpdesk Worker Library
//!
//! Background processing for the helpdesk: delivering the email outbox and
//! activating scheduled subscriptions.
//!
//! ## Modules
//!
//! - `config`: Worker configuration
//! - `mailer`: Email provider trait and SMTP transport
//! - `queue`: Outbox claiming, retry and failure bookkeeping
//! - `orchestrator`: The worker loop

pub mod config;
pub mod mailer;
pub mod orchestrator;
pub mod queue;
