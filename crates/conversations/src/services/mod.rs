//! Business logic over the conversation store.

use std::sync::Arc;

use souk_config::MessagingConfig;

use crate::entities::Conversation;
use crate::repositories::ConversationStore;
use crate::types::{ConversationError, ConversationResult};
use crate::utils::validate_public_id;

pub mod ingress;
pub mod queries;
pub mod read_tracker;

pub use ingress::{MessageIngress, PreparedSend, SendTarget, SentMessage};
pub use queries::{ConversationQueries, HistoryPage};
pub use read_tracker::{ReadReceipt, ReadTracker};

/// All conversation services sharing one store.
#[derive(Clone)]
pub struct ConversationServices {
    pub ingress: MessageIngress,
    pub read_tracker: ReadTracker,
    pub queries: ConversationQueries,
}

impl ConversationServices {
    pub fn new(store: Arc<dyn ConversationStore>, config: &MessagingConfig) -> Self {
        Self {
            ingress: MessageIngress::new(store.clone(), config),
            read_tracker: ReadTracker::new(store.clone()),
            queries: ConversationQueries::new(store, config),
        }
    }
}

/// Load a conversation by public id and require `user_id` to be one of its
/// two participants.
pub(crate) async fn participant_conversation(
    store: &dyn ConversationStore,
    user_id: i64,
    conversation_id: &str,
) -> ConversationResult<Conversation> {
    validate_public_id("conversation", conversation_id)?;

    let conversation = store
        .find_conversation(conversation_id)
        .await?
        .ok_or_else(|| ConversationError::conversation_not_found(conversation_id))?;

    if !conversation.is_participant(user_id) {
        return Err(ConversationError::access_denied(
            "User is not a participant of this conversation",
        ));
    }

    Ok(conversation)
}
