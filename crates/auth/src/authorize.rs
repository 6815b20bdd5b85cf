use std::collections::BTreeSet;

use thiserror::Error;

use kestrel_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership, policy};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: the API derives the
/// membership from token claims and the role policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    /// Resolve a principal whose roles are expanded through the built-in policy.
    pub fn from_roles(principal_id: PrincipalId, tenant_id: TenantId, roles: Vec<crate::Role>) -> Self {
        let permissions = roles.iter().flat_map(policy::role_permissions).collect();
        Self {
            principal_id,
            active_tenant_id: tenant_id,
            membership: TenantMembership {
                tenant_id,
                roles,
                permissions,
            },
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal
        .membership
        .permissions
        .iter()
        .any(|granted| granted.grants(required))
    {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Concrete permissions from the resource table that the principal holds.
pub fn effective_permissions(principal: &Principal) -> BTreeSet<Permission> {
    policy::RESOURCES
        .iter()
        .flat_map(|r| r.permissions())
        .filter(|p| authorize(principal, p).is_ok())
        .collect()
}
