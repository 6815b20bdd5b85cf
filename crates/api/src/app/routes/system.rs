use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use kestrel_auth::effective_permissions;

use crate::context::RequestContext;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// The caller: company, principal, roles and what they may do.
pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    let permissions: Vec<String> = effective_permissions(&ctx.resolved())
        .into_iter()
        .map(|p| p.as_str().to_string())
        .collect();

    Json(json!({
        "data": {
            "tenant_id": ctx.tenant_id().to_string(),
            "principal_id": ctx.principal.principal_id().to_string(),
            "roles": ctx.principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            "effective_permissions": permissions,
        },
        "message": "Authenticated principal.",
    }))
}
