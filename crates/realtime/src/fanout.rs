//! Pure planning of which events go to which rooms.
//!
//! Nothing here touches connections; the hub executes the plan.

use souk_conversations::{Conversation, ReadReceipt, SentMessage};

use crate::events::ServerEvent;
use crate::rooms::{ConnectionId, RoomId};

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub room: RoomId,
    pub except: Option<ConnectionId>,
    pub event: ServerEvent,
}

pub fn conversation_room(conversation: &Conversation) -> RoomId {
    RoomId::Conversation(conversation.id)
}

/// A new message goes to the thread and, as a notification, to the
/// recipient's personal room.
pub fn plan_message(sent: &SentMessage) -> Vec<Dispatch> {
    vec![
        Dispatch {
            room: conversation_room(&sent.conversation),
            except: None,
            event: ServerEvent::NewMessage {
                message: sent.message.clone(),
            },
        },
        Dispatch {
            room: RoomId::User(sent.recipient_id),
            except: None,
            event: ServerEvent::MessageNotification {
                conversation_id: sent.conversation.public_id.clone(),
                message: sent.message.clone(),
            },
        },
    ]
}

/// Nothing is announced when the read-mark changed no rows.
pub fn plan_read(
    receipt: &ReadReceipt,
    reader_public_id: &str,
    origin: Option<ConnectionId>,
) -> Option<Dispatch> {
    if !receipt.changed() {
        return None;
    }

    Some(Dispatch {
        room: conversation_room(&receipt.conversation),
        except: origin,
        event: ServerEvent::MessagesRead {
            conversation_id: receipt.conversation.public_id.clone(),
            read_by: reader_public_id.to_owned(),
        },
    })
}

pub fn plan_typing(
    conversation: &Conversation,
    typist_public_id: &str,
    origin: ConnectionId,
) -> Dispatch {
    Dispatch {
        room: conversation_room(conversation),
        except: Some(origin),
        event: ServerEvent::UserTyping {
            user_id: typist_public_id.to_owned(),
            conversation_id: conversation.public_id.clone(),
        },
    }
}
