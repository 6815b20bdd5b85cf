use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Router,
};

use kestrel_infra::services::{PartnerChanges, PartnerInput};
use kestrel_infra::Services;
use kestrel_partners::PartnerId;

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const PARTNERS: Gate = Gate::new("partners", "partners");

const LISTING: Listing = Listing {
    searchable: &["name", "email"],
    sortable: &["name", "kind", "created_at", "updated_at"],
};

pub fn router() -> Router {
    Router::new()
        .route("/partners", get(list_partners).post(create_partner))
        .route("/partners/:id", get(show_partner).put(update_partner))
        .route("/partners/:id/archive", post(archive_partner))
        .route("/partners/:id/restore", post(restore_partner))
}

async fn list_partners(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("view_any"))?;
    let rows = services.partners(ctx.tenant_id()).iter().map(dto::partner_to_json).collect();
    dto::page(query.apply(rows, LISTING)?, "Partners retrieved.")
}

async fn create_partner(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<PartnerInput>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("create"))?;
    let partner = services.register_partner(ctx.tenant_id(), input)?;
    dto::created(dto::partner_to_json(&partner), "Partner created.")
}

async fn show_partner(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("view"))?;
    let partner = services.partner(ctx.tenant_id(), PartnerId::new(parse_id(&id)?))?;
    dto::ok(dto::partner_to_json(&partner), "Partner retrieved.")
}

async fn update_partner(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Body(changes): Body<PartnerChanges>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("update"))?;
    let partner = services.update_partner(ctx.tenant_id(), PartnerId::new(parse_id(&id)?), changes)?;
    dto::ok(dto::partner_to_json(&partner), "Partner updated.")
}

async fn archive_partner(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("archive"))?;
    let partner = services.archive_partner(ctx.tenant_id(), PartnerId::new(parse_id(&id)?))?;
    dto::ok(dto::partner_to_json(&partner), "Partner archived.")
}

async fn restore_partner(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PARTNERS.ability("restore"))?;
    let partner = services.restore_partner(ctx.tenant_id(), PartnerId::new(parse_id(&id)?))?;
    dto::ok(dto::partner_to_json(&partner), "Partner restored.")
}
