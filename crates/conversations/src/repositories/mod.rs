//! Data access for conversations and messages.

use async_trait::async_trait;

use crate::entities::{Conversation, ConversationSummary, Listing, Message, ThreadKey};
use crate::types::ConversationResult;

pub mod sqlite_store;

pub use sqlite_store::SqliteConversationStore;

/// Durable storage behind message ingress, read tracking and the inbox
/// queries. The store is the only owner of persisted state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_listing(&self, public_id: &str) -> ConversationResult<Option<Listing>>;

    async fn find_conversation(&self, public_id: &str) -> ConversationResult<Option<Conversation>>;

    /// Resolve the conversation for a thread, creating it if needed, and
    /// store the first message in the same transaction. The flag is true when
    /// this call created the row. Concurrent callers with the same key observe
    /// the same conversation, and a failed insert leaves no conversation
    /// behind.
    async fn start_conversation(
        &self,
        thread: ThreadKey,
        sender_id: i64,
        content: &str,
    ) -> ConversationResult<(Conversation, Message, bool)>;

    /// Persist a message and bump the conversation's activity timestamp
    /// atomically.
    async fn append_message(
        &self,
        conversation: &Conversation,
        sender_id: i64,
        content: &str,
    ) -> ConversationResult<Message>;

    /// Flip every unread message not authored by `reader_id`. Returns the
    /// number of rows changed.
    async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> ConversationResult<u64>;

    /// Messages newest first.
    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: u32,
        offset: u64,
    ) -> ConversationResult<Vec<Message>>;

    async fn summaries_for(&self, user_id: i64) -> ConversationResult<Vec<ConversationSummary>>;

    async fn unread_total(&self, user_id: i64) -> ConversationResult<i64>;
}
