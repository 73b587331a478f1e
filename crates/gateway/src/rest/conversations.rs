//! Conversation REST endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use souk_conversations::{ConversationSummary, Message, SendMessage};
use souk_realtime::Principal;
use utoipa::{IntoParams, ToSchema};

use crate::error::GatewayResult;
use crate::state::GatewayState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.public_id,
            conversation_id: message.conversation_public_id,
            sender_id: message.sender_public_id,
            content: message.content,
            read: message.read,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListingResponse {
    pub id: String,
    pub title: String,
    pub price_cents: Option<i64>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ParticipantResponse {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummaryResponse {
    pub conversation_id: String,
    pub listing: ListingResponse,
    pub other_participant: ParticipantResponse,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i64,
    pub last_message_at: String,
}

impl From<ConversationSummary> for ConversationSummaryResponse {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            conversation_id: summary.conversation_id,
            listing: ListingResponse {
                id: summary.listing.id,
                title: summary.listing.title,
                price_cents: summary.listing.price_cents,
                image_url: summary.listing.image_url,
            },
            other_participant: ParticipantResponse {
                id: summary.other_participant.id,
                display_name: summary.other_participant.display_name,
            },
            last_message: summary.last_message.map(MessageResponse::from),
            unread_count: summary.unread_count,
            last_message_at: summary.last_message_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummaryResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadResponse {
    pub unread: i64,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct HistoryQuery {
    /// 1-based page, newest page first
    pub page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub page: u32,
    pub has_more: bool,
    /// Oldest first within the page
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartConversationRequest {
    pub listing_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartConversationResponse {
    pub conversation_id: String,
    /// False when the caller already had a thread about this listing
    pub created: bool,
    pub message: MessageResponse,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadResponse {
    pub conversation_id: String,
    pub updated: u64,
}

pub fn create_conversation_routes() -> Router<GatewayState> {
    Router::new()
        .route(
            "/conversations",
            get(list_conversations).post(start_conversation),
        )
        .route("/conversations/unread", get(unread_count))
        .route(
            "/conversations/:conversation_id/messages",
            get(get_messages).post(post_message),
        )
        .route("/conversations/:conversation_id/read", patch(mark_read))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Conversations of the caller, latest activity first", body = ConversationsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_conversations(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
) -> GatewayResult<Json<ConversationsResponse>> {
    let conversations = state
        .hub()
        .list_conversations(principal.user_id)
        .await?
        .into_iter()
        .map(ConversationSummaryResponse::from)
        .collect();

    Ok(Json(ConversationsResponse { conversations }))
}

#[utoipa::path(
    get,
    path = "/api/conversations/unread",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Unread incoming messages across all conversations", body = UnreadResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn unread_count(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
) -> GatewayResult<Json<UnreadResponse>> {
    let unread = state.hub().unread_total(principal.user_id).await?;
    Ok(Json(UnreadResponse { unread }))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    params(
        ("conversation_id" = String, Path, description = "Conversation public ID"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "One page of history", body = HistoryResponse),
        (status = 400, description = "Invalid page", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Not a participant", body = crate::error::ErrorResponse),
        (status = 404, description = "Conversation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_messages(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> GatewayResult<Json<HistoryResponse>> {
    let page = state
        .hub()
        .history(&principal, None, &conversation_id, query.page.unwrap_or(1))
        .await?;

    Ok(Json(HistoryResponse {
        conversation_id: page.conversation.public_id,
        page: page.page,
        has_more: page.has_more,
        messages: page.messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    request_body = StartConversationRequest,
    responses(
        (status = 201, description = "Message stored in the caller's thread about the listing", body = StartConversationResponse),
        (status = 400, description = "Invalid message", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Caller owns the listing", body = crate::error::ErrorResponse),
        (status = 404, description = "Listing not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn start_conversation(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<StartConversationRequest>,
) -> GatewayResult<(StatusCode, Json<StartConversationResponse>)> {
    let sent = state
        .hub()
        .send(
            &principal,
            None,
            &SendMessage::about_listing(request.listing_id, request.message),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartConversationResponse {
            conversation_id: sent.conversation.public_id,
            created: sent.created,
            message: sent.message.into(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    params(
        ("conversation_id" = String, Path, description = "Conversation public ID")
    ),
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message stored and fanned out", body = MessageResponse),
        (status = 400, description = "Invalid message", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Not a participant", body = crate::error::ErrorResponse),
        (status = 404, description = "Conversation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn post_message(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> GatewayResult<(StatusCode, Json<MessageResponse>)> {
    let sent = state
        .hub()
        .send(
            &principal,
            None,
            &SendMessage::to_conversation(conversation_id, request.content),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(sent.message.into())))
}

#[utoipa::path(
    patch,
    path = "/api/conversations/{conversation_id}/read",
    tag = "Conversations",
    security(("bearerAuth" = [])),
    params(
        ("conversation_id" = String, Path, description = "Conversation public ID")
    ),
    responses(
        (status = 200, description = "Incoming messages marked read", body = ReadResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Not a participant", body = crate::error::ErrorResponse),
        (status = 404, description = "Conversation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn mark_read(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<String>,
) -> GatewayResult<Json<ReadResponse>> {
    let receipt = state
        .hub()
        .mark_read(&principal, None, &conversation_id)
        .await?;

    Ok(Json(ReadResponse {
        conversation_id: receipt.conversation.public_id,
        updated: receipt.updated,
    }))
}
