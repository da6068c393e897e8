/// API route handlers
///
/// Handlers are grouped by resource:
///
/// - `health`: liveness and database check
/// - `auth`: accounts, tokens and password resets
/// - `plans`: public plan catalog
/// - `organizations`: organization creation and member management
/// - `invitations`: sending and answering invitations
/// - `subscriptions`: plan changes, cancellation and checkout
/// - `webhook`: payment processor callbacks
/// - `tickets`: the support queue
/// - `dashboard`: ticket statistics
/// - `assistant`: free-form AI chat

pub mod assistant;
pub mod auth;
pub mod dashboard;
pub mod health;
pub mod invitations;
pub mod organizations;
pub mod plans;
pub mod subscriptions;
pub mod tickets;
pub mod webhook;
