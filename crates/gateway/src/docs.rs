use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::{error, rest, websocket};

#[derive(OpenApi)]
#[openapi(
    paths(
        rest::health::health_check,
        rest::conversations::list_conversations,
        rest::conversations::unread_count,
        rest::conversations::get_messages,
        rest::conversations::start_conversation,
        rest::conversations::post_message,
        rest::conversations::mark_read,
        websocket::websocket_handler,
    ),
    components(
        schemas(
            error::ErrorResponse,
            rest::health::HealthResponse,
            rest::conversations::MessageResponse,
            rest::conversations::ListingResponse,
            rest::conversations::ParticipantResponse,
            rest::conversations::ConversationSummaryResponse,
            rest::conversations::ConversationsResponse,
            rest::conversations::UnreadResponse,
            rest::conversations::HistoryResponse,
            rest::conversations::StartConversationRequest,
            rest::conversations::StartConversationResponse,
            rest::conversations::PostMessageRequest,
            rest::conversations::ReadResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Conversations", description = "Listing conversations and their messages"),
        (name = "Realtime", description = "Live conversation socket"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let schemes = &mut components.security_schemes;

        let mut scheme = SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer));
        if let SecurityScheme::Http(http) = &mut scheme {
            http.bearer_format = Some("Bearer".to_string());
        }

        schemes.insert("bearerAuth".to_string(), scheme);
    }
}
