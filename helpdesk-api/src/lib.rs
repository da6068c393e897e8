//! # Helpdesk API Server Library
//!
//! HTTP surface of the multi-tenant helpdesk: accounts, organizations,
//! invitations, subscriptions, tickets and the AI assistant.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `clients`: Outbound AI and payment provider clients
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Security response headers
//! - `routes`: API route handlers

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
