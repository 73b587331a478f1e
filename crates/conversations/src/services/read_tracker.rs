use std::sync::Arc;

use tracing::debug;

use super::participant_conversation;
use crate::entities::Conversation;
use crate::repositories::ConversationStore;
use crate::types::ConversationResult;

/// Result of a read-mark. `updated` is zero when everything was already read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReceipt {
    pub conversation: Conversation,
    pub reader_id: i64,
    pub updated: u64,
}

impl ReadReceipt {
    pub fn changed(&self) -> bool {
        self.updated > 0
    }
}

#[derive(Clone)]
pub struct ReadTracker {
    store: Arc<dyn ConversationStore>,
}

impl ReadTracker {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Mark every incoming message in the conversation as read.
    pub async fn mark_read(&self, reader_id: i64, conversation_id: &str) -> ConversationResult<ReadReceipt> {
        let conversation =
            participant_conversation(self.store.as_ref(), reader_id, conversation_id).await?;
        self.mark_conversation_read(reader_id, conversation).await
    }

    /// Same as [`ReadTracker::mark_read`] for a conversation the caller has
    /// already authorised.
    pub async fn mark_conversation_read(
        &self,
        reader_id: i64,
        conversation: Conversation,
    ) -> ConversationResult<ReadReceipt> {
        let updated = self.store.mark_read(conversation.id, reader_id).await?;

        debug!(
            conversation_id = conversation.id,
            reader_id,
            updated,
            "marked messages read"
        );

        Ok(ReadReceipt {
            conversation,
            reader_id,
            updated,
        })
    }
}
