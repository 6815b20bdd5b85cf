use axum::{routing::get, Router};

use kestrel_core::AggregateId;

use crate::app::errors::ApiError;

pub mod accounts;
pub mod inventory;
pub mod partners;
pub mod products;
pub mod purchases;
pub mod sales;
pub mod security;
pub mod system;
pub mod time_off;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/security", security::router())
        .nest("/partners", partners::router())
        .nest("/products", products::router())
        .nest("/inventories", inventory::router())
        .nest("/purchases", purchases::router())
        .nest("/sales", sales::router())
        .nest("/accounts", accounts::router())
        .nest("/time-off", time_off::router())
}

/// Parse a path id; anything malformed cannot exist.
pub(crate) fn parse_id(raw: &str) -> Result<AggregateId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}
