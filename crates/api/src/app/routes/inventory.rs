//! Locations, stock operations and quantities.
//!
//! Receipts, deliveries, internal transfers and dropships share one set of
//! handlers; the router of each type carries its `OperationScope`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post, put},
    Router,
};
use serde_json::json;

use kestrel_infra::projections::Snapshot;
use kestrel_infra::services::{LocationInput, OperationInput};
use kestrel_infra::Services;
use kestrel_inventory::{LocationId, NewMove, Operation, OperationId, OperationType, ProductQuantityId};

use crate::app::dto::{
    self, ApiResult, Body, CountRequest, DemandRequest, MoveLinesRequest, OptionalBody, Params, ReturnRequest,
    ValidateRequest,
};
use crate::app::errors::ApiError;
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const LOCATIONS: Gate = Gate::new("inventories", "locations");
const QUANTITIES: Gate = Gate::new("inventories", "quantities");

const LOCATION_LISTING: Listing = Listing {
    searchable: &["name"],
    sortable: &["name", "usage", "created_at", "updated_at"],
};

const OPERATION_LISTING: Listing = Listing {
    searchable: &["reference"],
    sortable: &["reference", "state", "scheduled_at", "created_at", "updated_at"],
};

const QUANTITY_LISTING: Listing = Listing {
    searchable: &[],
    sortable: &["on_hand", "reserved", "available", "counted"],
};

/// Which operation type a router serves.
#[derive(Debug, Clone, Copy)]
pub struct OperationScope {
    pub operation_type: OperationType,
    pub gate: Gate,
    pub label: &'static str,
}

const SCOPES: &[(&str, OperationScope)] = &[
    (
        "receipts",
        OperationScope {
            operation_type: OperationType::Receipt,
            gate: Gate::new("inventories", "receipts"),
            label: "Receipt",
        },
    ),
    (
        "deliveries",
        OperationScope {
            operation_type: OperationType::Delivery,
            gate: Gate::new("inventories", "deliveries"),
            label: "Delivery",
        },
    ),
    (
        "internals",
        OperationScope {
            operation_type: OperationType::Internal,
            gate: Gate::new("inventories", "internals"),
            label: "Internal transfer",
        },
    ),
    (
        "dropships",
        OperationScope {
            operation_type: OperationType::Dropship,
            gate: Gate::new("inventories", "dropships"),
            label: "Dropship",
        },
    ),
];

pub fn router() -> Router {
    let mut router = Router::new()
        .route("/locations", get(list_locations).post(create_location))
        .route("/locations/:id", get(show_location))
        .route("/locations/:id/archive", post(archive_location))
        .route("/quantities", get(list_quantities).post(count_quantity))
        .route("/quantities/:id", get(show_quantity))
        .route("/quantities/:id/apply", post(apply_count))
        .route("/quantities/:id/clear", post(clear_count));

    for (path, scope) in SCOPES {
        router = router.merge(operations_router(path, *scope));
    }
    router
}

fn operations_router(path: &str, scope: OperationScope) -> Router {
    Router::new()
        .route(&format!("/{path}"), get(list_operations).post(create_operation))
        .route(&format!("/{path}/:id"), get(show_operation))
        .route(&format!("/{path}/:id/history"), get(operation_history))
        .route(&format!("/{path}/:id/moves"), post(add_move))
        .route(&format!("/{path}/:id/moves/:move_no"), put(update_move).delete(remove_move))
        .route(&format!("/{path}/:id/moves/:move_no/lines"), put(set_move_lines))
        .route(&format!("/{path}/:id/todo"), post(mark_as_todo))
        .route(&format!("/{path}/:id/check-availability"), post(check_availability))
        .route(&format!("/{path}/:id/validate"), post(validate_operation))
        .route(&format!("/{path}/:id/cancel"), post(cancel_operation))
        .route(&format!("/{path}/:id/return"), post(return_operation))
        .layer(Extension(scope))
}

// -------------------------
// Locations
// -------------------------

async fn list_locations(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(LOCATIONS.ability("view_any"))?;
    let rows = services.locations(ctx.tenant_id()).iter().map(dto::location_to_json).collect();
    dto::page(query.apply(rows, LOCATION_LISTING)?, "Locations retrieved.")
}

async fn create_location(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<LocationInput>,
) -> ApiResult {
    ctx.require(LOCATIONS.ability("create"))?;
    let location = services.create_location(ctx.tenant_id(), input)?;
    dto::created(dto::location_to_json(&location), "Location created.")
}

async fn show_location(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(LOCATIONS.ability("view"))?;
    let location = services.location(ctx.tenant_id(), LocationId::new(parse_id(&id)?))?;
    dto::ok(dto::location_to_json(&location), "Location retrieved.")
}

async fn archive_location(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(LOCATIONS.ability("archive"))?;
    let location = services.archive_location(ctx.tenant_id(), LocationId::new(parse_id(&id)?))?;
    dto::ok(dto::location_to_json(&location), "Location archived.")
}

// -------------------------
// Operations
// -------------------------

/// Load an operation of the scope's type; other types do not exist here.
fn scoped(
    services: &Services,
    ctx: &RequestContext,
    scope: OperationScope,
    raw_id: &str,
) -> Result<Snapshot<Operation>, ApiError> {
    let operation = services.operation(ctx.tenant_id(), OperationId::new(parse_id(raw_id)?))?;
    if operation.aggregate.operation_type() != scope.operation_type {
        return Err(ApiError::NotFound);
    }
    Ok(operation)
}

fn respond(scope: OperationScope, operation: &Snapshot<Operation>, verb: &str) -> ApiResult {
    dto::ok(dto::operation_to_json(operation), &format!("{} {verb}.", scope.label))
}

async fn list_operations(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(scope.gate.ability("view_any"))?;
    let rows = services
        .operations(ctx.tenant_id(), Some(scope.operation_type))
        .iter()
        .map(dto::operation_to_json)
        .collect();
    dto::page(query.apply(rows, OPERATION_LISTING)?, &format!("{}s retrieved.", scope.label))
}

async fn create_operation(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Body(input): Body<OperationInput>,
) -> ApiResult {
    ctx.require(scope.gate.ability("create"))?;
    let operation = services.create_operation(ctx.tenant_id(), scope.operation_type, input)?;
    dto::created(dto::operation_to_json(&operation), &format!("{} created.", scope.label))
}

async fn show_operation(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(scope.gate.ability("view"))?;
    let operation = scoped(&services, &ctx, scope, &id)?;
    respond(scope, &operation, "retrieved")
}

async fn operation_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(scope.gate.ability("view"))?;
    let operation = scoped(&services, &ctx, scope, &id)?;
    let history = services.operation_history(ctx.tenant_id(), operation.aggregate.id_typed())?;
    dto::ok(json!(history), "History retrieved.")
}

async fn add_move(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
    Body(new_move): Body<NewMove>,
) -> ApiResult {
    ctx.require(scope.gate.ability("update"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.add_move(ctx.tenant_id(), operation_id, new_move)?;
    respond(scope, &operation, "updated")
}

async fn update_move(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path((id, move_no)): Path<(String, u32)>,
    Body(body): Body<DemandRequest>,
) -> ApiResult {
    ctx.require(scope.gate.ability("update"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.update_move_demand(ctx.tenant_id(), operation_id, move_no, body.demand)?;
    respond(scope, &operation, "updated")
}

async fn remove_move(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path((id, move_no)): Path<(String, u32)>,
) -> ApiResult {
    ctx.require(scope.gate.ability("update"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.remove_move(ctx.tenant_id(), operation_id, move_no)?;
    respond(scope, &operation, "updated")
}

async fn set_move_lines(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path((id, move_no)): Path<(String, u32)>,
    Body(body): Body<MoveLinesRequest>,
) -> ApiResult {
    ctx.require(scope.gate.ability("update"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.set_move_lines(ctx.tenant_id(), operation_id, move_no, body.lines)?;
    respond(scope, &operation, "updated")
}

async fn mark_as_todo(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(scope.gate.ability("todo"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.mark_as_todo(ctx.tenant_id(), operation_id)?;
    respond(scope, &operation, "marked as to do")
}

async fn check_availability(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(scope.gate.ability("check_availability"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.check_availability(ctx.tenant_id(), operation_id)?;
    respond(scope, &operation, "availability checked")
}

async fn validate_operation(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
    OptionalBody(body): OptionalBody<ValidateRequest>,
) -> ApiResult {
    ctx.require(scope.gate.ability("validate"))?;
    let create_backorder = body.map(|b| b.create_backorder).unwrap_or_default();
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.validate_operation(ctx.tenant_id(), operation_id, create_backorder)?;
    respond(scope, &operation, "validated")
}

async fn cancel_operation(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(scope.gate.ability("cancel"))?;
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let operation = services.cancel_operation(ctx.tenant_id(), operation_id)?;
    respond(scope, &operation, "canceled")
}

/// Responds with the new return operation.
async fn return_operation(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<OperationScope>,
    Path(id): Path<String>,
    OptionalBody(body): OptionalBody<ReturnRequest>,
) -> ApiResult {
    ctx.require(scope.gate.ability("return"))?;
    let lines = body.map(|b| b.lines).unwrap_or_default();
    let operation_id = scoped(&services, &ctx, scope, &id)?.aggregate.id_typed();
    let returned = services.return_operation(ctx.tenant_id(), operation_id, lines)?;
    dto::ok(dto::operation_to_json(&returned), "Return created.")
}

// -------------------------
// Quantities
// -------------------------

fn quantity_id(raw: &str) -> Result<ProductQuantityId, ApiError> {
    Ok(ProductQuantityId::new(parse_id(raw)?))
}

async fn list_quantities(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(QUANTITIES.ability("view_any"))?;
    let rows = services
        .quantities(ctx.tenant_id())
        .iter()
        .map(|q| json!(q))
        .collect();
    dto::page(query.apply(rows, QUANTITY_LISTING)?, "Quantities retrieved.")
}

async fn show_quantity(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(QUANTITIES.ability("view"))?;
    let quantity = services.quantity(ctx.tenant_id(), quantity_id(&id)?)?;
    dto::ok(json!(quantity), "Quantity retrieved.")
}

async fn count_quantity(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(body): Body<CountRequest>,
) -> ApiResult {
    ctx.require(QUANTITIES.ability("count"))?;
    let quantity = services.count_quantity(ctx.tenant_id(), body.product_id, body.location_id, body.counted)?;
    dto::created(json!(quantity), "Quantity counted.")
}

async fn apply_count(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(QUANTITIES.ability("apply"))?;
    let quantity = services.apply_count(ctx.tenant_id(), quantity_id(&id)?)?;
    dto::ok(json!(quantity), "Count applied.")
}

async fn clear_count(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(QUANTITIES.ability("clear"))?;
    let quantity = services.clear_count(ctx.tenant_id(), quantity_id(&id)?)?;
    dto::ok(json!(quantity), "Count cleared.")
}
