use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use kestrel_auth::JwtValidator;
use kestrel_infra::Services;

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, RequestContext, TenantContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub services: Arc<Services>,
}

/// Authenticate the bearer token and attach the request context.
///
/// The first request of a company bootstraps its default locations.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        ApiError::Unauthenticated
    })?;

    state.services.ensure_company(claims.tenant_id)?;

    let tenant = TenantContext::new(claims.tenant_id);
    let principal = PrincipalContext::new(claims.sub, claims.roles);
    req.extensions_mut().insert(tenant);
    req.extensions_mut().insert(principal.clone());
    req.extensions_mut().insert(RequestContext { tenant, principal });

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(ApiError::Unauthenticated)?;

    let header = header.to_str().map_err(|_| ApiError::Unauthenticated)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(ApiError::Unauthenticated);
    }

    Ok(token)
}
