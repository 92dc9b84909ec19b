//! Axum router construction.
//!
//! Applications merge their own transactional routes into the router
//! returned by [`build_router`]; CORS is applied to everything.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

/// Build the router with the built-in routes plus `routes`.
///
/// The router includes:
/// - `GET /health` -- database round trip in a read-only transaction
///
/// CORS allows any origin, method and header.
pub fn build_router_with(state: Arc<AppState>, routes: Router<Arc<AppState>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .merge(routes)
        .layer(cors)
        .with_state(state)
}

/// Build the router with only the built-in routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    build_router_with(state, Router::new())
}
