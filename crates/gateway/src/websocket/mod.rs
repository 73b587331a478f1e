//! WebSocket endpoint for live conversation events

mod handlers;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use souk_realtime::{ClientEvent, Principal, ServerEvent, OUTBOUND_BUFFER};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::bearer_token;
use crate::state::GatewayState;

pub use handlers::handle_client_event;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WebSocketQuery {
    /// Session token, for clients that cannot set headers on the upgrade
    token: Option<String>,
}

pub fn create_websocket_routes() -> Router<GatewayState> {
    Router::new().route("/ws", get(websocket_handler))
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "Realtime",
    params(WebSocketQuery),
    responses(
        (status = 101, description = "Switching to the conversation socket"),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ErrorResponse)
    )
)]
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> GatewayResult<Response> {
    let token = params
        .token
        .as_deref()
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            GatewayError::AuthenticationFailed("Missing authentication token".to_string())
        })?;

    let principal = state.authenticate(token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, principal)))
}

async fn handle_socket(socket: WebSocket, state: GatewayState, principal: Principal) {
    let (mut ws_sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let connection = state.hub().connect(&principal, out_tx).await;
    let session_id = connection.id();

    info!(user_id = principal.user_id, %session_id, "websocket connected");

    let sender_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(%error, event = event.kind(), "failed to encode server event");
                    continue;
                }
            };

            if let Err(error) = ws_sender.send(WsMessage::Text(payload)).await {
                debug!(%error, "websocket send failed");
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&state, &principal, &connection, event).await,
                Err(error) => {
                    debug!(%session_id, %error, "unparseable client event");
                    connection.send(ServerEvent::invalid_event(format!(
                        "Invalid event format: {error}"
                    )));
                }
            },
            Ok(WsMessage::Binary(_)) => {
                connection.send(ServerEvent::invalid_event("Binary frames are not supported"));
            }
            Ok(WsMessage::Close(_)) => break,
            Err(error) => {
                debug!(%session_id, %error, "websocket receive failed");
                break;
            }
            _ => {
                // Ping and pong frames are answered by the transport.
            }
        }
    }

    state.hub().disconnect(&connection).await;
    drop(connection);
    sender_task.abort();

    info!(user_id = principal.user_id, %session_id, "websocket disconnected");
}
