//! Roles, permissions and tenant checks
//!
//! Roles are stored as a flat enum on the user row. Handlers never compare
//! roles directly; they ask for a [`Permission`], and the role is mapped to
//! a [`PermissionSet`] once per request by the auth middleware.
//!
//! | Permission | user | staff | admin |
//! |------------|:----:|:-----:|:-----:|
//! | submit / view own tickets, respond, comment | ✓ | ✓ | ✓ |
//! | view all tickets, change status, delete any, internal comments | | ✓ | ✓ |
//! | manage members and invitations, billing, outbox failures | | | ✓ |
//!
//! Organization-scoped permissions are only granted when the user belongs
//! to an organization. Without one, only [`Permission::CreateOrganization`]
//! and [`Permission::UseAssistant`] are available.
//!
//! # Example
//!
//! ```
//! use helpdesk_shared::auth::authorization::{Permission, PermissionSet};
//! use helpdesk_shared::models::user::Role;
//!
//! let staff = PermissionSet::for_role(Role::Staff, true);
//! assert!(staff.contains(Permission::UpdateTicketStatus));
//! assert!(!staff.contains(Permission::ManageBilling));
//! ```

use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::user::Role;

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("Missing permission: {0}")]
    MissingPermission(Permission),

    #[error("You must belong to an organization to do this")]
    NoOrganization,

    #[error("Resource belongs to another organization")]
    CrossOrganization,

    #[error("Not authorized to access this resource")]
    NotAuthorized,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// A single capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Permission {
    CreateOrganization = 0,
    UseAssistant,
    SubmitTicket,
    ViewOwnTickets,
    RespondToTicket,
    CommentOnTicket,
    ViewAllTickets,
    UpdateTicketStatus,
    DeleteAnyTicket,
    WriteInternalComment,
    ManageMembers,
    ManageInvitations,
    ManageBilling,
    ViewEmailFailures,
}

impl Permission {
    pub const ALL: [Permission; 14] = [
        Permission::CreateOrganization,
        Permission::UseAssistant,
        Permission::SubmitTicket,
        Permission::ViewOwnTickets,
        Permission::RespondToTicket,
        Permission::CommentOnTicket,
        Permission::ViewAllTickets,
        Permission::UpdateTicketStatus,
        Permission::DeleteAnyTicket,
        Permission::WriteInternalComment,
        Permission::ManageMembers,
        Permission::ManageInvitations,
        Permission::ManageBilling,
        Permission::ViewEmailFailures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CreateOrganization => "organization:create",
            Permission::UseAssistant => "assistant:use",
            Permission::SubmitTicket => "tickets:submit",
            Permission::ViewOwnTickets => "tickets:read_own",
            Permission::RespondToTicket => "tickets:respond",
            Permission::CommentOnTicket => "tickets:comment",
            Permission::ViewAllTickets => "tickets:read_all",
            Permission::UpdateTicketStatus => "tickets:update_status",
            Permission::DeleteAnyTicket => "tickets:delete_any",
            Permission::WriteInternalComment => "tickets:comment_internal",
            Permission::ManageMembers => "members:manage",
            Permission::ManageInvitations => "invitations:manage",
            Permission::ManageBilling => "billing:manage",
            Permission::ViewEmailFailures => "emails:read_failed",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Bit set of permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet(u32);

impl PermissionSet {
    pub const EMPTY: PermissionSet = PermissionSet(0);

    pub fn from_permissions(perms: &[Permission]) -> Self {
        perms.iter().fold(Self::EMPTY, |set, p| set.with(*p))
    }

    /// Permissions of `role`, with organization-scoped ones only when the
    /// user belongs to an organization
    pub fn for_role(role: Role, in_organization: bool) -> Self {
        if !in_organization {
            return Self::from_permissions(&[Permission::CreateOrganization, Permission::UseAssistant]);
        }

        let member = Self::from_permissions(&[
            Permission::UseAssistant,
            Permission::SubmitTicket,
            Permission::ViewOwnTickets,
            Permission::RespondToTicket,
            Permission::CommentOnTicket,
        ]);

        let staff = member.union(Self::from_permissions(&[
            Permission::ViewAllTickets,
            Permission::UpdateTicketStatus,
            Permission::DeleteAnyTicket,
            Permission::WriteInternalComment,
        ]));

        match role {
            Role::User => member,
            Role::Staff => staff,
            Role::Admin => staff.union(Self::from_permissions(&[
                Permission::ManageMembers,
                Permission::ManageInvitations,
                Permission::ManageBilling,
                Permission::ViewEmailFailures,
            ])),
        }
    }

    #[must_use]
    pub fn with(self, perm: Permission) -> Self {
        Self(self.0 | perm.bit())
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, perm: Permission) -> bool {
        self.0 & perm.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Fails unless the caller holds `perm`
pub fn require_permission(auth: &AuthContext, perm: Permission) -> Result<(), AuthzError> {
    if auth.permissions.contains(perm) {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission(perm))
    }
}

/// Returns the caller's organization, or fails if they have none
pub fn require_organization(auth: &AuthContext) -> Result<Uuid, AuthzError> {
    auth.organization_id.ok_or(AuthzError::NoOrganization)
}

/// Fails unless `organization_id` is the caller's organization
pub fn require_same_organization(auth: &AuthContext, organization_id: Uuid) -> Result<(), AuthzError> {
    match auth.organization_id {
        Some(own) if own == organization_id => Ok(()),
        Some(_) => Err(AuthzError::CrossOrganization),
        None => Err(AuthzError::NoOrganization),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role, organization_id: Option<Uuid>) -> AuthContext {
        AuthContext::new(Uuid::new_v4(), "jdoe@acme.com".to_string(), role, organization_id)
    }

    #[test]
    fn test_roles_are_layered() {
        let user = PermissionSet::for_role(Role::User, true);
        let staff = PermissionSet::for_role(Role::Staff, true);
        let admin = PermissionSet::for_role(Role::Admin, true);

        for perm in user.iter() {
            assert!(staff.contains(perm), "staff lacks {}", perm);
        }
        for perm in staff.iter() {
            assert!(admin.contains(perm), "admin lacks {}", perm);
        }

        assert!(!user.contains(Permission::ViewAllTickets));
        assert!(staff.contains(Permission::WriteInternalComment));
        assert!(!staff.contains(Permission::ManageMembers));
        assert!(admin.contains(Permission::ManageBilling));
    }

    #[test]
    fn test_no_organization_limits_permissions() {
        let admin_without_org = PermissionSet::for_role(Role::Admin, false);
        assert!(admin_without_org.contains(Permission::CreateOrganization));
        assert!(admin_without_org.contains(Permission::UseAssistant));
        assert!(!admin_without_org.contains(Permission::SubmitTicket));
        assert!(!admin_without_org.contains(Permission::ManageBilling));

        assert!(!PermissionSet::for_role(Role::User, true).contains(Permission::CreateOrganization));
    }

    #[test]
    fn test_require_permission() {
        let auth = context(Role::User, Some(Uuid::new_v4()));
        assert!(require_permission(&auth, Permission::SubmitTicket).is_ok());
        assert!(matches!(
            require_permission(&auth, Permission::UpdateTicketStatus),
            Err(AuthzError::MissingPermission(Permission::UpdateTicketStatus))
        ));
    }

    #[test]
    fn test_require_same_organization() {
        let org = Uuid::new_v4();
        let auth = context(Role::Admin, Some(org));
        assert!(require_same_organization(&auth, org).is_ok());
        assert!(matches!(
            require_same_organization(&auth, Uuid::new_v4()),
            Err(AuthzError::CrossOrganization)
        ));

        let loner = context(Role::User, None);
        assert!(matches!(require_organization(&loner), Err(AuthzError::NoOrganization)));
    }

    #[test]
    fn test_permission_set_serializes_as_names() {
        let set = PermissionSet::from_permissions(&[Permission::UseAssistant, Permission::SubmitTicket]);
        assert_eq!(
            serde_json::to_value(set).unwrap(),
            serde_json::json!(["assistant:use", "tickets:submit"])
        );
    }
}
