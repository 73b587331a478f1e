use souk_conversations::{ConversationError, SendMessage};
use souk_realtime::{ClientEvent, ConnectionHandle, Principal, ServerEvent};
use tracing::{debug, error, warn};

use crate::state::GatewayState;

/// Apply one client event. Failures are reported to this connection only.
pub async fn handle_client_event(
    state: &GatewayState,
    principal: &Principal,
    connection: &ConnectionHandle,
    event: ClientEvent,
) {
    let kind = event_kind(&event);
    debug!(session_id = %connection.id(), event = kind, "client event");

    if let Err(failure) = dispatch(state, principal, connection, event).await {
        if failure.is_client_error() {
            warn!(
                user_id = principal.user_id,
                session_id = %connection.id(),
                event = kind,
                error = %failure,
                "client event rejected"
            );
        } else {
            error!(
                user_id = principal.user_id,
                session_id = %connection.id(),
                event = kind,
                error = %failure,
                "client event failed"
            );
        }
        connection.send(ServerEvent::from(&failure));
    }
}

async fn dispatch(
    state: &GatewayState,
    principal: &Principal,
    connection: &ConnectionHandle,
    event: ClientEvent,
) -> Result<(), ConversationError> {
    let hub = state.hub();

    match event {
        ClientEvent::Ping => {
            connection.send(ServerEvent::Pong);
        }
        ClientEvent::JoinConversation { conversation_id } => {
            let conversation = hub.join_conversation(connection, &conversation_id).await?;
            connection.send(ServerEvent::Joined {
                conversation_id: conversation.public_id,
            });
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            let conversation = hub.leave_conversation(connection, &conversation_id).await?;
            connection.send(ServerEvent::Left {
                conversation_id: conversation.public_id,
            });
        }
        ClientEvent::SendMessage {
            conversation_id,
            listing_id,
            content,
        } => {
            let request = SendMessage {
                conversation_id,
                listing_id,
                content,
            };
            hub.send(principal, Some(connection), &request).await?;
        }
        ClientEvent::Typing { conversation_id } => {
            hub.typing(principal, connection, &conversation_id).await?;
        }
        ClientEvent::MarkRead { conversation_id } => {
            hub.mark_read(principal, Some(connection.id()), &conversation_id)
                .await?;
        }
    }

    Ok(())
}

fn event_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Ping => "ping",
        ClientEvent::JoinConversation { .. } => "join_conversation",
        ClientEvent::LeaveConversation { .. } => "leave_conversation",
        ClientEvent::SendMessage { .. } => "send_message",
        ClientEvent::Typing { .. } => "typing",
        ClientEvent::MarkRead { .. } => "mark_read",
    }
}
