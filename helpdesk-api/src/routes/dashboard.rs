//! `GET /v1/dashboard`
//!
//! Staff and admins get organization-wide statistics; plain users get the
//! status counts of their own tickets. Both include the five most recent
//! visible tickets.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use chrono::{DateTime, NaiveTime, Utc};
use helpdesk_shared::{
    auth::{
        authorization::{require_organization, require_permission, Permission},
        middleware::AuthContext,
    },
    models::{
        ticket::{OrganizationTicketCounts, SubmitterTicketCounts, Ticket, TicketScope, TicketSummary},
        user::User,
    },
};
use serde::Serialize;

const RECENT_TICKETS: i64 = 5;

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Dashboard {
    Staff(StaffDashboard),
    User(UserDashboard),
}

#[derive(Debug, Serialize)]
pub struct StaffDashboard {
    pub total_tickets: i64,
    pub open_tickets: i64,
    pub high_priority_tickets: i64,
    pub team_members: i64,

    /// Mean hours to first staff response, e.g. `"3.5h"`
    pub avg_response_time: String,

    pub resolved_today: i64,

    /// Closed share of all tickets, e.g. `"42.9%"`
    pub resolution_rate: String,

    pub recent_tickets: Vec<TicketSummary>,
}

#[derive(Debug, Serialize)]
pub struct UserDashboard {
    #[serde(flatten)]
    pub counts: SubmitterTicketCounts,
    pub recent_tickets: Vec<TicketSummary>,
}

/// Midnight UTC of the day containing `now`
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn format_hours(avg_secs: Option<f64>) -> String {
    format!("{:.1}h", avg_secs.unwrap_or(0.0) / 3600.0)
}

fn format_rate(closed: i64, total: i64) -> String {
    let rate = if total > 0 {
        closed as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    format!("{:.1}%", rate)
}

fn staff_view(
    counts: OrganizationTicketCounts,
    team_members: i64,
    recent_tickets: Vec<TicketSummary>,
) -> StaffDashboard {
    StaffDashboard {
        total_tickets: counts.total,
        open_tickets: counts.open,
        high_priority_tickets: counts.high_priority,
        team_members,
        avg_response_time: format_hours(counts.avg_first_response_secs),
        resolved_today: counts.resolved_today,
        resolution_rate: format_rate(counts.closed, counts.total),
        recent_tickets,
    }
}

pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Dashboard>> {
    require_permission(&auth, Permission::ViewOwnTickets)?;
    let organization_id = require_organization(&auth)?;

    let now = Utc::now();
    let scope = TicketScope {
        organization_id,
        user_id: auth.user_id,
        is_staff: auth.is_staff(),
    };
    let recent_tickets =
        Ticket::list_summaries(&state.db, &scope, &[], now, Some(RECENT_TICKETS)).await?;

    let view = if scope.is_staff {
        let counts =
            Ticket::organization_counts(&state.db, organization_id, start_of_day(now)).await?;
        let team_members = User::count_by_organization(&state.db, organization_id).await?;
        Dashboard::Staff(staff_view(counts, team_members, recent_tickets))
    } else {
        let counts = Ticket::submitter_counts(&state.db, organization_id, auth.user_id).await?;
        Dashboard::User(UserDashboard {
            counts,
            recent_tickets,
        })
    };

    Ok(Json(view))
}
