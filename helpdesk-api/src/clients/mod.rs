//! Outbound provider clients
//!
//! - `assistant`: chat completions for ticket suggestions and chat
//! - `checkout`: hosted checkout sessions for paid plans

pub mod assistant;
pub mod checkout;
