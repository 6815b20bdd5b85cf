use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, post},
    Router,
};
use serde_json::json;

use kestrel_infra::services::{OrderTransition, PurchaseOrderInput, RequisitionInput, RequisitionLineInput, RequisitionTransition};
use kestrel_infra::Services;
use kestrel_purchases::{NewPurchaseLine, PurchaseOrderId, RequisitionId};

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::errors::ApiError;
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const ORDERS: Gate = Gate::new("purchases", "orders");
const AGREEMENTS: Gate = Gate::new("purchases", "agreements");

const ORDER_LISTING: Listing = Listing {
    searchable: &["reference"],
    sortable: &["reference", "state", "amount_total", "created_at", "updated_at"],
};

const AGREEMENT_LISTING: Listing = Listing {
    searchable: &["reference"],
    sortable: &["reference", "state", "type", "created_at", "updated_at"],
};

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/:id", get(show_order))
        .route("/orders/:id/history", get(order_history))
        .route("/orders/:id/lines", post(add_order_line))
        .route("/orders/:id/lines/:line_no", delete(remove_order_line))
        .route("/orders/:id/send", order_action(OrderTransition::Send))
        .route("/orders/:id/confirm", order_action(OrderTransition::Confirm))
        .route("/orders/:id/lock", order_action(OrderTransition::Lock))
        .route("/orders/:id/unlock", order_action(OrderTransition::Unlock))
        .route("/orders/:id/cancel", order_action(OrderTransition::Cancel))
        .route("/orders/:id/draft", order_action(OrderTransition::ResetToDraft))
        .route("/agreements", get(list_agreements).post(create_agreement))
        .route("/agreements/:id", get(show_agreement))
        .route("/agreements/:id/history", get(agreement_history))
        .route("/agreements/:id/lines", post(add_agreement_line))
        .route("/agreements/:id/confirm", agreement_action(RequisitionTransition::Confirm))
        .route("/agreements/:id/close", agreement_action(RequisitionTransition::Close))
        .route("/agreements/:id/cancel", agreement_action(RequisitionTransition::Cancel))
}

fn order_action(transition: OrderTransition) -> axum::routing::MethodRouter {
    post(transition_order).layer(Extension(transition))
}

fn agreement_action(transition: RequisitionTransition) -> axum::routing::MethodRouter {
    post(transition_agreement).layer(Extension(transition))
}

/// Permission ability and past-tense verb of an order transition.
pub(crate) fn order_transition_names(transition: OrderTransition) -> (&'static str, &'static str) {
    match transition {
        OrderTransition::Send => ("send", "sent"),
        OrderTransition::Confirm => ("confirm", "confirmed"),
        OrderTransition::Lock => ("lock", "locked"),
        OrderTransition::Unlock => ("unlock", "unlocked"),
        OrderTransition::Cancel => ("cancel", "canceled"),
        OrderTransition::ResetToDraft => ("draft", "reset to draft"),
    }
}

fn order_id(raw: &str) -> Result<PurchaseOrderId, ApiError> {
    Ok(PurchaseOrderId::new(parse_id(raw)?))
}

fn requisition_id(raw: &str) -> Result<RequisitionId, ApiError> {
    Ok(RequisitionId::new(parse_id(raw)?))
}

// -------------------------
// Purchase orders
// -------------------------

async fn list_orders(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view_any"))?;
    let rows = services
        .purchase_orders(ctx.tenant_id())
        .iter()
        .map(dto::purchase_order_to_json)
        .collect();
    dto::page(query.apply(rows, ORDER_LISTING)?, "Purchase orders retrieved.")
}

async fn create_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<PurchaseOrderInput>,
) -> ApiResult {
    ctx.require(ORDERS.ability("create"))?;
    let order = services.create_purchase_order(ctx.tenant_id(), input)?;
    dto::created(dto::purchase_order_to_json(&order), "Purchase order created.")
}

async fn show_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view"))?;
    let order = services.purchase_order(ctx.tenant_id(), order_id(&id)?)?;
    dto::ok(dto::purchase_order_to_json(&order), "Purchase order retrieved.")
}

async fn order_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view"))?;
    let order_id = order_id(&id)?;
    services.purchase_order(ctx.tenant_id(), order_id)?;
    let history = services.history(ctx.tenant_id(), order_id.0)?;
    dto::ok(json!(history), "History retrieved.")
}

async fn add_order_line(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Body(line): Body<NewPurchaseLine>,
) -> ApiResult {
    ctx.require(ORDERS.ability("update"))?;
    let order = services.add_purchase_line(ctx.tenant_id(), order_id(&id)?, line)?;
    dto::ok(dto::purchase_order_to_json(&order), "Purchase order updated.")
}

async fn remove_order_line(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, line_no)): Path<(String, u32)>,
) -> ApiResult {
    ctx.require(ORDERS.ability("update"))?;
    let order = services.remove_purchase_line(ctx.tenant_id(), order_id(&id)?, line_no)?;
    dto::ok(dto::purchase_order_to_json(&order), "Purchase order updated.")
}

async fn transition_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(transition): Extension<OrderTransition>,
    Path(id): Path<String>,
) -> ApiResult {
    let (ability, verb) = order_transition_names(transition);
    ctx.require(ORDERS.ability(ability))?;
    let order = services.purchase_order_action(ctx.tenant_id(), order_id(&id)?, transition)?;
    dto::ok(dto::purchase_order_to_json(&order), &format!("Purchase order {verb}."))
}

// -------------------------
// Purchase agreements
// -------------------------

async fn list_agreements(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(AGREEMENTS.ability("view_any"))?;
    let rows = services
        .requisitions(ctx.tenant_id())
        .iter()
        .map(dto::requisition_to_json)
        .collect();
    dto::page(query.apply(rows, AGREEMENT_LISTING)?, "Purchase agreements retrieved.")
}

async fn create_agreement(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<RequisitionInput>,
) -> ApiResult {
    ctx.require(AGREEMENTS.ability("create"))?;
    let requisition = services.create_requisition(ctx.tenant_id(), input)?;
    dto::created(dto::requisition_to_json(&requisition), "Purchase agreement created.")
}

async fn show_agreement(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(AGREEMENTS.ability("view"))?;
    let requisition = services.requisition(ctx.tenant_id(), requisition_id(&id)?)?;
    dto::ok(dto::requisition_to_json(&requisition), "Purchase agreement retrieved.")
}

async fn agreement_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(AGREEMENTS.ability("view"))?;
    let requisition_id = requisition_id(&id)?;
    services.requisition(ctx.tenant_id(), requisition_id)?;
    let history = services.history(ctx.tenant_id(), requisition_id.0)?;
    dto::ok(json!(history), "History retrieved.")
}

async fn add_agreement_line(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Body(line): Body<RequisitionLineInput>,
) -> ApiResult {
    ctx.require(AGREEMENTS.ability("update"))?;
    let requisition = services.add_requisition_line(ctx.tenant_id(), requisition_id(&id)?, line)?;
    dto::ok(dto::requisition_to_json(&requisition), "Purchase agreement updated.")
}

async fn transition_agreement(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(transition): Extension<RequisitionTransition>,
    Path(id): Path<String>,
) -> ApiResult {
    let (ability, verb) = match transition {
        RequisitionTransition::Confirm => ("confirm", "confirmed"),
        RequisitionTransition::Close => ("close", "closed"),
        RequisitionTransition::Cancel => ("cancel", "canceled"),
    };
    ctx.require(AGREEMENTS.ability(ability))?;
    let requisition = services.requisition_action(ctx.tenant_id(), requisition_id(&id)?, transition)?;
    dto::ok(dto::requisition_to_json(&requisition), &format!("Purchase agreement {verb}."))
}
