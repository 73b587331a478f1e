//! REST fallback endpoints for clients without a live socket

pub mod conversations;
pub mod health;

use axum::{middleware as axum_middleware, routing::get, Router};

use crate::middleware::require_bearer;
use crate::state::GatewayState;

/// Create all REST API routes. Everything under `/api` requires a bearer
/// token.
pub fn create_rest_routes(state: GatewayState) -> Router<GatewayState> {
    let api = conversations::create_conversation_routes()
        .route_layer(axum_middleware::from_fn_with_state(state, require_bearer));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api)
}
