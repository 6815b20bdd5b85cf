use kestrel_auth::{Permission, Principal, PrincipalId, Role, authorize};
use kestrel_core::{TenantId, UserId};

use crate::app::errors::ApiError;

/// Tenant context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

/// Everything a handler needs to know about the caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant: TenantContext,
    pub principal: PrincipalContext,
}

impl RequestContext {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant.tenant_id()
    }

    /// The caller as an employee of the company.
    pub fn user_id(&self) -> UserId {
        UserId::from_uuid(*self.principal.principal_id().as_uuid())
    }

    pub fn resolved(&self) -> Principal {
        Principal::from_roles(
            self.principal.principal_id(),
            self.tenant_id(),
            self.principal.roles().to_vec(),
        )
    }

    /// Fail with 403 unless the caller holds `permission`.
    pub fn require(&self, permission: impl Into<String>) -> Result<(), ApiError> {
        let permission = Permission::new(permission.into());
        authorize(&self.resolved(), &permission).map_err(ApiError::from)
    }
}
