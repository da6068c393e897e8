//! Organization membership: creation, invitations and member management
//!
//! Every operation runs in its own transaction. Permission checks
//! (who may invite, remove and so on) belong to the caller; the rules here
//! cover the state of the organization, its members and its invitations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::billing::billing_period;
use crate::models::invitation::{expiry_from, Invitation, NewInvitation, PendingInvitation};
use crate::models::organization::{CreateOrganization, Organization};
use crate::models::plan::Plan;
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionStatus};
use crate::models::user::{MemberSummary, Role, User};
use crate::outbox;
use crate::seats::{self, SeatError, SeatUsage};

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("You already belong to an organization")]
    AlreadyInOrganization,

    #[error("An organization with domain {0} already exists")]
    DomainTaken(String),

    #[error("The Free plan is missing from the plan catalog")]
    FreePlanMissing,

    #[error("{0} is already a member of this organization")]
    AlreadyMember(String),

    #[error("An active invitation has already been sent to {0}")]
    InvitationExists(String),

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("This invitation is not for your email address")]
    EmailMismatch,

    #[error("This invitation has expired")]
    Expired,

    #[error("You cannot remove yourself from the organization")]
    CannotRemoveSelf,

    #[error("You cannot change your own role")]
    CannotChangeOwnRole,

    #[error("You cannot modify another admin's role")]
    CannotChangeAdminRole,

    #[error("User not found")]
    UserNotFound,

    #[error("User is not in your organization")]
    NotInOrganization,

    #[error("Organization not found")]
    OrganizationNotFound,

    #[error("Organization has no subscription plan")]
    NoPlan,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SeatError> for MembershipError {
    fn from(err: SeatError) -> Self {
        match err {
            SeatError::OrganizationNotFound(_) => MembershipError::OrganizationNotFound,
            SeatError::NoPlan(_) => MembershipError::NoPlan,
            SeatError::DatabaseError(e) => MembershipError::Database(e),
        }
    }
}

/// Whether `err` is a violation of the named unique constraint
fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.constraint() == Some(constraint),
        _ => false,
    }
}

/// Result of creating an organization
#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrganization {
    pub organization: Organization,
    pub subscription: Subscription,
}

/// Creates an organization on the Free plan with `user_id` as its admin
pub async fn create_organization(
    pool: &PgPool,
    user_id: Uuid,
    data: CreateOrganization,
    now: DateTime<Utc>,
) -> Result<CreatedOrganization, MembershipError> {
    let mut tx = pool.begin().await?;

    let user = User::find_by_id_for_update(&mut *tx, user_id)
        .await?
        .ok_or(MembershipError::UserNotFound)?;
    if user.organization_id.is_some() {
        return Err(MembershipError::AlreadyInOrganization);
    }

    let domain = crate::models::organization::normalize_domain(&data.domain);
    if Organization::find_by_domain(&mut *tx, &domain).await?.is_some() {
        return Err(MembershipError::DomainTaken(domain));
    }

    let free = Plan::find_free(&mut *tx)
        .await?
        .ok_or(MembershipError::FreePlanMissing)?;

    let organization = Organization::create(&mut *tx, data).await.map_err(|e| {
        if is_unique_violation(&e, "organizations_domain_key") {
            MembershipError::DomainTaken(domain.clone())
        } else {
            MembershipError::Database(e)
        }
    })?;

    let subscription = Subscription::insert(
        &mut *tx,
        NewSubscription {
            organization_id: organization.id,
            plan_id: free.id,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: None,
            last_billing_date: Some(now),
            next_billing_date: Some(now + billing_period()),
        },
    )
    .await?;

    Organization::set_current_subscription(&mut *tx, organization.id, free.id, subscription.id)
        .await?;
    User::join_organization(&mut *tx, user.id, organization.id, Role::Admin).await?;

    // Re-read so the returned pointers reflect the update
    let organization = Organization::find_by_id(&mut *tx, organization.id)
        .await?
        .ok_or(MembershipError::OrganizationNotFound)?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization.id,
        domain = %organization.domain,
        admin_id = %user.id,
        "Organization created"
    );

    Ok(CreatedOrganization {
        organization,
        subscription,
    })
}

/// Link the invitee follows to accept
pub fn accept_url(public_url: &str, token: &str) -> String {
    format!(
        "{}/v1/invitations/{}/accept",
        public_url.trim_end_matches('/'),
        token
    )
}

/// Invites `email` into the caller's organization and queues the email
///
/// `staff` and `admin` invitations are flagged as admin invites.
pub async fn invite(
    pool: &PgPool,
    organization_id: Uuid,
    email: &str,
    role: Role,
    public_url: &str,
    now: DateTime<Utc>,
) -> Result<Invitation, MembershipError> {
    let email = email.trim().to_lowercase();
    let mut tx = pool.begin().await?;

    let organization = Organization::find_by_id(&mut *tx, organization_id)
        .await?
        .ok_or(MembershipError::OrganizationNotFound)?;

    if User::find_member_by_email(&mut *tx, organization_id, &email)
        .await?
        .is_some()
    {
        return Err(MembershipError::AlreadyMember(email));
    }

    let purged = Invitation::purge_stale(&mut *tx, organization_id, &email, now).await?;
    if purged > 0 {
        tracing::debug!(organization_id = %organization_id, purged, "Purged stale invitations");
    }

    if Invitation::find_live(&mut *tx, organization_id, &email, now)
        .await?
        .is_some()
    {
        return Err(MembershipError::InvitationExists(email));
    }

    let invitation = Invitation::create(
        &mut *tx,
        NewInvitation {
            email: email.clone(),
            organization_id,
            is_admin_invite: role.is_staff(),
        },
        now,
    )
    .await?;

    outbox::queue(
        &mut *tx,
        outbox::invitation_email(
            organization_id,
            &email,
            &organization.name,
            &accept_url(public_url, &invitation.token),
        ),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        invitation_id = %invitation.id,
        admin_invite = invitation.is_admin_invite,
        "Invitation issued"
    );

    Ok(invitation)
}

/// Accepts an invitation addressed to the caller
///
/// Used both for accepting by link and for joining with a pasted token.
/// Returns the organization joined.
pub async fn accept_invitation(
    pool: &PgPool,
    user: &AuthContext,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Organization, MembershipError> {
    let mut tx = pool.begin().await?;

    let invitation = Invitation::find_by_token(&mut *tx, token.trim())
        .await?
        .ok_or(MembershipError::InvitationNotFound)?;

    if invitation.is_expired(now) {
        return Err(MembershipError::Expired);
    }
    if !invitation.is_for(&user.email) {
        return Err(MembershipError::EmailMismatch);
    }

    let role = if invitation.is_admin_invite {
        Role::Admin
    } else {
        Role::User
    };

    if !User::join_organization(&mut *tx, user.user_id, invitation.organization_id, role).await? {
        return Err(MembershipError::UserNotFound);
    }
    Invitation::delete(&mut *tx, invitation.id).await?;

    let organization = Organization::find_by_id(&mut *tx, invitation.organization_id)
        .await?
        .ok_or(MembershipError::OrganizationNotFound)?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization.id,
        user_id = %user.user_id,
        role = %role.as_str(),
        "Invitation accepted"
    );

    Ok(organization)
}

/// Declines (deletes) an invitation addressed to the caller
pub async fn decline_invitation(
    pool: &PgPool,
    user: &AuthContext,
    token: &str,
) -> Result<(), MembershipError> {
    let invitation = Invitation::find_by_token(pool, token)
        .await?
        .ok_or(MembershipError::InvitationNotFound)?;

    if !invitation.is_for(&user.email) {
        return Err(MembershipError::EmailMismatch);
    }

    Invitation::delete(pool, invitation.id).await?;
    Ok(())
}

/// Looks up an invitation issued by `organization_id`
async fn find_own_invitation<'e, E>(
    executor: E,
    organization_id: Uuid,
    token: &str,
) -> Result<Invitation, MembershipError>
where
    E: sqlx::PgExecutor<'e>,
{
    Invitation::find_by_token(executor, token)
        .await?
        .filter(|inv| inv.organization_id == organization_id)
        .ok_or(MembershipError::InvitationNotFound)
}

/// Pushes an invitation's expiry out by another 7 days and re-sends it
pub async fn resend_invitation(
    pool: &PgPool,
    organization_id: Uuid,
    token: &str,
    public_url: &str,
    now: DateTime<Utc>,
) -> Result<Invitation, MembershipError> {
    let mut tx = pool.begin().await?;

    let mut invitation = find_own_invitation(&mut *tx, organization_id, token).await?;
    let organization = Organization::find_by_id(&mut *tx, organization_id)
        .await?
        .ok_or(MembershipError::OrganizationNotFound)?;

    invitation.expires_at = expiry_from(now);
    Invitation::extend(&mut *tx, invitation.id, invitation.expires_at).await?;

    outbox::queue(
        &mut *tx,
        outbox::invitation_email(
            organization_id,
            &invitation.email,
            &organization.name,
            &accept_url(public_url, &invitation.token),
        ),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(invitation_id = %invitation.id, "Invitation resent");
    Ok(invitation)
}

/// Cancels an invitation issued by `organization_id`
pub async fn cancel_invitation(
    pool: &PgPool,
    organization_id: Uuid,
    token: &str,
) -> Result<(), MembershipError> {
    let invitation = find_own_invitation(pool, organization_id, token).await?;
    Invitation::delete(pool, invitation.id).await?;

    tracing::info!(invitation_id = %invitation.id, "Invitation cancelled");
    Ok(())
}

/// Live invitations addressed to the caller
pub async fn pending_invitations(
    pool: &PgPool,
    user: &AuthContext,
    now: DateTime<Utc>,
) -> Result<Vec<PendingInvitation>, MembershipError> {
    Ok(Invitation::list_pending_for_email(pool, &user.email, now).await?)
}

/// Removes a member from the admin's organization
pub async fn remove_member(
    pool: &PgPool,
    admin: &AuthContext,
    member_id: Uuid,
) -> Result<(), MembershipError> {
    let organization_id = admin
        .organization_id
        .ok_or(MembershipError::NotInOrganization)?;

    if member_id == admin.user_id {
        return Err(MembershipError::CannotRemoveSelf);
    }

    let mut tx = pool.begin().await?;

    let member = User::find_by_id_for_update(&mut *tx, member_id)
        .await?
        .ok_or(MembershipError::UserNotFound)?;
    if member.organization_id != Some(organization_id) {
        return Err(MembershipError::NotInOrganization);
    }

    User::leave_organization(&mut *tx, &[member.id]).await?;
    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        user_id = %member_id,
        "Member removed from organization"
    );

    Ok(())
}

/// Changes the role of a non-admin member of the admin's organization
pub async fn change_member_role(
    pool: &PgPool,
    admin: &AuthContext,
    member_id: Uuid,
    role: Role,
) -> Result<MemberSummary, MembershipError> {
    let organization_id = admin
        .organization_id
        .ok_or(MembershipError::NotInOrganization)?;

    let mut tx = pool.begin().await?;

    let mut member = User::find_by_id_for_update(&mut *tx, member_id)
        .await?
        .ok_or(MembershipError::UserNotFound)?;
    if member.organization_id != Some(organization_id) {
        return Err(MembershipError::NotInOrganization);
    }
    if member.id == admin.user_id {
        return Err(MembershipError::CannotChangeOwnRole);
    }
    if member.role == Role::Admin {
        return Err(MembershipError::CannotChangeAdminRole);
    }

    User::update_role(&mut *tx, member.id, role).await?;
    tx.commit().await?;

    tracing::info!(
        organization_id = %organization_id,
        user_id = %member_id,
        role = %role.as_str(),
        "Member role changed"
    );

    member.role = role;
    Ok(MemberSummary::from(&member))
}

/// Everything the organization management view shows
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationOverview {
    pub organization: Organization,
    pub plan: Plan,
    pub members: Vec<MemberSummary>,
    pub pending_invitations: Vec<Invitation>,
    pub plans: Vec<Plan>,
    pub seats: SeatUsage,
    pub remaining_seats: i64,

    /// Members evicted by this load for exceeding the seat limit
    pub evicted: Vec<Uuid>,
}

/// Loads the management view, enforcing the seat limit first
pub async fn organization_overview(
    pool: &PgPool,
    organization_id: Uuid,
    now: DateTime<Utc>,
) -> Result<OrganizationOverview, MembershipError> {
    let enforcement = seats::enforce_seat_limit(pool, organization_id).await?;

    let organization = Organization::find_by_id(pool, organization_id)
        .await?
        .ok_or(MembershipError::OrganizationNotFound)?;
    let plan_id = organization
        .subscription_plan_id
        .ok_or(MembershipError::NoPlan)?;
    let plan = Plan::find_by_id(pool, plan_id)
        .await?
        .ok_or(MembershipError::NoPlan)?;

    let members = User::list_by_organization(pool, organization_id).await?;
    let pending_invitations =
        Invitation::list_pending_for_organization(pool, organization_id, now).await?;
    let plans = Plan::list_active(pool).await?;

    let seats = SeatUsage {
        limit: i64::from(plan.team_size_limit),
        used: members.iter().filter(|m| m.is_active).count() as i64,
    };

    Ok(OrganizationOverview {
        remaining_seats: seats.remaining(),
        members: members.iter().map(MemberSummary::from).collect(),
        organization,
        plan,
        pending_invitations,
        plans,
        seats,
        evicted: enforcement.evicted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_url() {
        assert_eq!(
            accept_url("https://help.acme.com/", "abc123"),
            "https://help.acme.com/v1/invitations/abc123/accept"
        );
        assert_eq!(
            accept_url("http://localhost:8080", "t"),
            "http://localhost:8080/v1/invitations/t/accept"
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            MembershipError::DomainTaken("acme.com".into()).to_string(),
            "An organization with domain acme.com already exists"
        );
        assert_eq!(
            MembershipError::CannotChangeAdminRole.to_string(),
            "You cannot modify another admin's role"
        );
    }

    #[test]
    fn test_seat_errors_convert() {
        let err: MembershipError = SeatError::NoPlan(Uuid::new_v4()).into();
        assert!(matches!(err, MembershipError::NoPlan));
    }
}
