//! # Souk Gateway Crate
//!
//! HTTP and WebSocket surface of the conversation service. Both transports
//! call into the same [`souk_realtime::ChatHub`], so a message posted over
//! REST reaches live sockets exactly like one sent over a socket.
//!
//! - **REST**: `/api/conversations/...` fallback for clients without a socket
//! - **WebSocket**: `/ws`, authenticated with `?token=` or a bearer header
//! - **State**: authenticator plus hub, shared by every handler
//! - **Middleware**: bearer authentication, CORS, request logging

#[cfg(debug_assertions)]
pub mod docs;
pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use middleware::{logging_middleware, require_bearer};
pub use state::GatewayState;

pub use create_router as build_router;

use axum::{middleware as axum_middleware, Router};
#[cfg(debug_assertions)]
use utoipa::OpenApi;
#[cfg(debug_assertions)]
use utoipa_swagger_ui::SwaggerUi;

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let mut router = Router::new()
        .merge(rest::create_rest_routes(state.clone()))
        .merge(websocket::create_websocket_routes())
        .with_state(state);

    // Add Swagger UI if in debug mode
    #[cfg(debug_assertions)]
    {
        router = router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
        );
    }

    router
        .layer(middleware::cors_layer())
        .layer(axum_middleware::from_fn(logging_middleware))
}
