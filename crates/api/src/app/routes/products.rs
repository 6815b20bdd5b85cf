use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Router,
};

use kestrel_infra::services::{ProductChanges, ProductInput};
use kestrel_infra::Services;
use kestrel_products::ProductId;

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const PRODUCTS: Gate = Gate::new("products", "products");

const LISTING: Listing = Listing {
    searchable: &["sku", "name"],
    sortable: &["sku", "name", "type", "sales_price", "cost", "created_at", "updated_at"],
};

pub fn router() -> Router {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(show_product).put(update_product))
        .route("/products/:id/archive", post(archive_product))
        .route("/products/:id/restore", post(restore_product))
}

fn product_id(raw: &str) -> Result<ProductId, crate::app::errors::ApiError> {
    Ok(ProductId::new(parse_id(raw)?))
}

async fn list_products(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("view_any"))?;
    let rows = services.products(ctx.tenant_id()).iter().map(dto::product_to_json).collect();
    dto::page(query.apply(rows, LISTING)?, "Products retrieved.")
}

async fn create_product(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<ProductInput>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("create"))?;
    let product = services.create_product(ctx.tenant_id(), input)?;
    dto::created(dto::product_to_json(&product), "Product created.")
}

async fn show_product(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("view"))?;
    let product = services.product(ctx.tenant_id(), product_id(&id)?)?;
    dto::ok(dto::product_to_json(&product), "Product retrieved.")
}

async fn update_product(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Body(changes): Body<ProductChanges>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("update"))?;
    let product = services.update_product(ctx.tenant_id(), product_id(&id)?, changes)?;
    dto::ok(dto::product_to_json(&product), "Product updated.")
}

async fn archive_product(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("archive"))?;
    let product = services.archive_product(ctx.tenant_id(), product_id(&id)?)?;
    dto::ok(dto::product_to_json(&product), "Product archived.")
}

async fn restore_product(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PRODUCTS.ability("restore"))?;
    let product = services.restore_product(ctx.tenant_id(), product_id(&id)?)?;
    dto::ok(dto::product_to_json(&product), "Product restored.")
}
