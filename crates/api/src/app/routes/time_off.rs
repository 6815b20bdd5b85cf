use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Router,
};
use serde_json::json;

use kestrel_infra::services::{LeaveInput, LeaveTransition};
use kestrel_infra::Services;
use kestrel_time_off::LeaveId;

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::errors::ApiError;
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const LEAVES: Gate = Gate::new("time_off", "leaves");

const LISTING: Listing = Listing {
    searchable: &["reason"],
    sortable: &["state", "leave_type", "date_from", "date_to", "days", "created_at", "updated_at"],
};

pub fn router() -> Router {
    Router::new()
        .route("/leaves", get(list_leaves).post(request_leave))
        .route("/leaves/:id", get(show_leave))
        .route("/leaves/:id/history", get(leave_history))
        .route("/leaves/:id/approve", action(LeaveTransition::Approve))
        .route("/leaves/:id/refuse", action(LeaveTransition::Refuse))
        .route("/leaves/:id/cancel", action(LeaveTransition::Cancel))
        .route("/leaves/:id/reset", action(LeaveTransition::Reset))
}

fn action(transition: LeaveTransition) -> axum::routing::MethodRouter {
    post(transition_leave).layer(Extension(transition))
}

fn leave_id(raw: &str) -> Result<LeaveId, ApiError> {
    Ok(LeaveId::new(parse_id(raw)?))
}

async fn list_leaves(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(LEAVES.ability("view_any"))?;
    let rows = services.leaves(ctx.tenant_id()).iter().map(dto::leave_to_json).collect();
    dto::page(query.apply(rows, LISTING)?, "Leaves retrieved.")
}

async fn request_leave(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<LeaveInput>,
) -> ApiResult {
    ctx.require(LEAVES.ability("create"))?;
    let leave = services.request_leave(ctx.tenant_id(), ctx.user_id(), input)?;
    dto::created(dto::leave_to_json(&leave), "Leave requested.")
}

async fn show_leave(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(LEAVES.ability("view"))?;
    let leave = services.leave(ctx.tenant_id(), leave_id(&id)?)?;
    dto::ok(dto::leave_to_json(&leave), "Leave retrieved.")
}

async fn leave_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(LEAVES.ability("view"))?;
    let leave_id = leave_id(&id)?;
    services.leave(ctx.tenant_id(), leave_id)?;
    let history = services.history(ctx.tenant_id(), leave_id.0)?;
    dto::ok(json!(history), "History retrieved.")
}

async fn transition_leave(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(transition): Extension<LeaveTransition>,
    Path(id): Path<String>,
) -> ApiResult {
    let (ability, verb) = match transition {
        LeaveTransition::Approve => ("approve", "approved"),
        LeaveTransition::Refuse => ("refuse", "refused"),
        LeaveTransition::Cancel => ("cancel", "canceled"),
        LeaveTransition::Reset => ("reset", "reset"),
    };
    ctx.require(LEAVES.ability(ability))?;
    let leave = services.leave_action(ctx.tenant_id(), leave_id(&id)?, ctx.user_id(), transition)?;
    dto::ok(dto::leave_to_json(&leave), &format!("Leave {verb}."))
}
