//! `kestrel-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, Principal, authorize, effective_permissions};
pub use claims::{
    Hs256JwtValidator, JwtClaims, JwtValidator, MAX_LEEWAY_SECS, TokenValidationError, validate_claims,
};
pub use permissions::Permission;
pub use policy::{RESOURCES, ResourcePolicy, RoleDefinition, role_definitions, role_permissions};
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
