//! Round-robin ticket assignment
//!
//! New tickets go to the staff member after the one who received the most
//! recently assigned ticket, cycling through the organization's roster of
//! active staff and admins in creation order.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::lock::{lock_for_transaction, LockScope};
use crate::models::ticket::Ticket;
use crate::models::user::User;

/// Picks the roster member after `last`
///
/// Falls back to the first member when there is no previous assignee or
/// that assignee has left the roster. Returns `None` for an empty roster.
pub fn next_assignee(roster: &[Uuid], last: Option<Uuid>) -> Option<Uuid> {
    let first = *roster.first()?;

    let next = last
        .and_then(|last| roster.iter().position(|id| *id == last))
        .map(|pos| roster[(pos + 1) % roster.len()])
        .unwrap_or(first);

    Some(next)
}

/// Chooses the assignee for a ticket about to be created in `tx`
///
/// Takes the organization's assignment lock, which is held until `tx`
/// ends, so the ticket must be inserted in the same transaction for
/// concurrent creations to rotate correctly.
pub async fn pick_assignee(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    lock_for_transaction(&mut **tx, LockScope::TicketAssignment(organization_id)).await?;

    let roster: Vec<Uuid> = User::staff_roster(&mut **tx, organization_id)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();

    if roster.is_empty() {
        tracing::debug!(organization_id = %organization_id, "No staff to assign ticket to");
        return Ok(None);
    }

    let last = Ticket::last_assignee(&mut **tx, organization_id).await?;
    Ok(next_assignee(&roster, last))
}
