//! Read side: inbox listing, paginated history and unread counts.

use std::sync::Arc;

use souk_config::MessagingConfig;

use super::participant_conversation;
use crate::entities::{Conversation, ConversationSummary, Message};
use crate::repositories::ConversationStore;
use crate::types::{ConversationError, ConversationResult};

/// One page of history, oldest message first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub page: u32,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct ConversationQueries {
    store: Arc<dyn ConversationStore>,
    page_size: u32,
}

impl ConversationQueries {
    pub fn new(store: Arc<dyn ConversationStore>, config: &MessagingConfig) -> Self {
        Self {
            store,
            page_size: config.history_page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The user's conversations, most recent activity first.
    pub async fn list(&self, user_id: i64) -> ConversationResult<Vec<ConversationSummary>> {
        self.store.summaries_for(user_id).await
    }

    pub async fn unread_total(&self, user_id: i64) -> ConversationResult<i64> {
        self.store.unread_total(user_id).await
    }

    pub async fn require_participant(
        &self,
        user_id: i64,
        conversation_id: &str,
    ) -> ConversationResult<Conversation> {
        participant_conversation(self.store.as_ref(), user_id, conversation_id).await
    }

    pub async fn history(
        &self,
        user_id: i64,
        conversation_id: &str,
        page: u32,
    ) -> ConversationResult<HistoryPage> {
        let conversation = self.require_participant(user_id, conversation_id).await?;
        self.history_of(conversation, page).await
    }

    /// Pages count back from the newest message; page 1 is the latest.
    pub async fn history_of(
        &self,
        conversation: Conversation,
        page: u32,
    ) -> ConversationResult<HistoryPage> {
        if page == 0 {
            return Err(ConversationError::validation("page starts at 1"));
        }

        let offset = u64::from(page - 1) * u64::from(self.page_size);
        let mut messages = self
            .store
            .recent_messages(conversation.id, self.page_size.saturating_add(1), offset)
            .await?;

        let has_more = messages.len() > self.page_size as usize;
        messages.truncate(self.page_size as usize);
        messages.reverse();

        Ok(HistoryPage {
            conversation,
            messages,
            page,
            has_more,
        })
    }
}
