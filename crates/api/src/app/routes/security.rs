//! Read-only view of the role policy.

use axum::{extract::Extension, routing::get, Router};
use serde_json::json;

use kestrel_auth::{role_definitions, RESOURCES};

use crate::app::dto::{self, ApiResult};
use crate::authz::Gate;
use crate::context::RequestContext;

const ROLES: Gate = Gate::new("security", "roles");

pub fn router() -> Router {
    Router::new()
        .route("/roles", get(list_roles))
        .route("/permissions", get(list_permissions))
}

async fn list_roles(Extension(ctx): Extension<RequestContext>) -> ApiResult {
    ctx.require(ROLES.ability("view_any"))?;
    dto::ok(json!(role_definitions()), "Roles retrieved.")
}

/// Every permission, grouped by resource.
async fn list_permissions(Extension(ctx): Extension<RequestContext>) -> ApiResult {
    ctx.require(ROLES.ability("view_any"))?;
    let resources: Vec<_> = RESOURCES
        .iter()
        .map(|r| {
            json!({
                "module": r.module,
                "resource": r.resource,
                "permissions": r.permissions().iter().map(|p| p.as_str().to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();
    dto::ok(json!(resources), "Permissions retrieved.")
}
