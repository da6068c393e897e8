//! Subscription billing
//!
//! - `lifecycle`: plan changes, cancellation, reactivation and scheduled activation
//! - `webhook`: payment processor signature verification
//! - `reconcile`: applying verified payment processor events
//!
//! Every write here holds the organization's subscription advisory lock
//! for the duration of its transaction.

pub mod lifecycle;
pub mod reconcile;
pub mod webhook;

use chrono::Duration;

/// Length of one billing period
pub const BILLING_PERIOD_DAYS: i64 = 30;

pub fn billing_period() -> Duration {
    Duration::days(BILLING_PERIOD_DAYS)
}
