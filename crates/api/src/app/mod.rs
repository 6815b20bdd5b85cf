//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per module)
//! - `dto.rs`: response envelopes and JSON mapping helpers
//! - `query.rs`: list filtering, sorting and pagination
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use kestrel_auth::Hs256JwtValidator;
use kestrel_infra::{AppConfig, Services};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod query;
pub mod routes;

pub const API_PREFIX: &str = "/admin/api/v1";

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: &AppConfig, services: Arc<Services>) -> Router {
    let jwt = Arc::new(
        Hs256JwtValidator::new(config.jwt_secret_or_dev()).with_leeway_secs(config.token_leeway_secs),
    );
    let auth_state = middleware::AuthState {
        jwt,
        services: Arc::clone(&services),
    };

    // Protected routes: require auth + tenant context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    let api = Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected);

    Router::new()
        .route("/health", get(routes::system::health))
        .nest(API_PREFIX, api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
