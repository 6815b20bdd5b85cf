use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, post},
    Router,
};
use serde_json::json;

use kestrel_infra::services::{OrderTransition, SalesOrderInput};
use kestrel_infra::Services;
use kestrel_sales::{NewOrderLine, SalesOrderId};

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::errors::ApiError;
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::app::routes::purchases::order_transition_names;
use crate::authz::Gate;
use crate::context::RequestContext;

const ORDERS: Gate = Gate::new("sales", "orders");

const LISTING: Listing = Listing {
    searchable: &["reference"],
    sortable: &["reference", "state", "amount_total", "created_at", "updated_at"],
};

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/:id", get(show_order))
        .route("/orders/:id/history", get(order_history))
        .route("/orders/:id/lines", post(add_line))
        .route("/orders/:id/lines/:line_no", delete(remove_line))
        .route("/orders/:id/send", action(OrderTransition::Send))
        .route("/orders/:id/confirm", action(OrderTransition::Confirm))
        .route("/orders/:id/lock", action(OrderTransition::Lock))
        .route("/orders/:id/unlock", action(OrderTransition::Unlock))
        .route("/orders/:id/cancel", action(OrderTransition::Cancel))
        .route("/orders/:id/draft", action(OrderTransition::ResetToDraft))
}

fn action(transition: OrderTransition) -> axum::routing::MethodRouter {
    post(transition_order).layer(Extension(transition))
}

fn order_id(raw: &str) -> Result<SalesOrderId, ApiError> {
    Ok(SalesOrderId::new(parse_id(raw)?))
}

async fn list_orders(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view_any"))?;
    let rows = services
        .sales_orders(ctx.tenant_id())
        .iter()
        .map(dto::sales_order_to_json)
        .collect();
    dto::page(query.apply(rows, LISTING)?, "Sales orders retrieved.")
}

async fn create_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<SalesOrderInput>,
) -> ApiResult {
    ctx.require(ORDERS.ability("create"))?;
    let order = services.create_sales_order(ctx.tenant_id(), input)?;
    dto::created(dto::sales_order_to_json(&order), "Sales order created.")
}

async fn show_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view"))?;
    let order = services.sales_order(ctx.tenant_id(), order_id(&id)?)?;
    dto::ok(dto::sales_order_to_json(&order), "Sales order retrieved.")
}

async fn order_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(ORDERS.ability("view"))?;
    let order_id = order_id(&id)?;
    services.sales_order(ctx.tenant_id(), order_id)?;
    let history = services.history(ctx.tenant_id(), order_id.0)?;
    dto::ok(json!(history), "History retrieved.")
}

async fn add_line(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Body(line): Body<NewOrderLine>,
) -> ApiResult {
    ctx.require(ORDERS.ability("update"))?;
    let order = services.add_sales_line(ctx.tenant_id(), order_id(&id)?, line)?;
    dto::ok(dto::sales_order_to_json(&order), "Sales order updated.")
}

async fn remove_line(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, line_no)): Path<(String, u32)>,
) -> ApiResult {
    ctx.require(ORDERS.ability("update"))?;
    let order = services.remove_sales_line(ctx.tenant_id(), order_id(&id)?, line_no)?;
    dto::ok(dto::sales_order_to_json(&order), "Sales order updated.")
}

async fn transition_order(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(transition): Extension<OrderTransition>,
    Path(id): Path<String>,
) -> ApiResult {
    let (ability, verb) = order_transition_names(transition);
    ctx.require(ORDERS.ability(ability))?;
    let order = services.sales_order_action(ctx.tenant_id(), order_id(&id)?, transition)?;
    dto::ok(dto::sales_order_to_json(&order), &format!("Sales order {verb}."))
}
