//! Message ingress: validation and persistence of new messages.

use std::sync::Arc;

use souk_config::MessagingConfig;
use tracing::info;

use super::participant_conversation;
use crate::entities::{Conversation, Message, ParticipantPair, SendMessage, ThreadKey};
use crate::repositories::ConversationStore;
use crate::types::{ConversationError, ConversationResult};
use crate::utils::{normalize_content, validate_public_id};

/// Where a validated send lands.
#[derive(Debug, Clone, PartialEq)]
pub enum SendTarget {
    /// A conversation the sender already belongs to.
    Existing(Conversation),
    /// The sender's thread about a listing. The conversation row is created
    /// together with the message if it does not exist yet.
    Thread(ThreadKey),
}

/// A validated send whose message is not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSend {
    pub target: SendTarget,
    pub recipient_id: i64,
    content: String,
}

impl PreparedSend {
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Key shared by every send into the same thread, known before the
    /// conversation row exists.
    pub fn thread_key(&self) -> ThreadKey {
        match &self.target {
            SendTarget::Existing(conversation) => conversation.thread_key(),
            SendTarget::Thread(thread) => *thread,
        }
    }
}

/// Outcome of a successful send, carrying everything fan-out needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub conversation: Conversation,
    pub message: Message,
    pub recipient_id: i64,
    /// True when this send created the conversation.
    pub created: bool,
}

#[derive(Clone)]
pub struct MessageIngress {
    store: Arc<dyn ConversationStore>,
    max_message_length: usize,
}

impl MessageIngress {
    pub fn new(store: Arc<dyn ConversationStore>, config: &MessagingConfig) -> Self {
        Self {
            store,
            max_message_length: config.max_message_length,
        }
    }

    /// Validate and persist a message in either shape.
    pub async fn send(&self, sender_id: i64, request: &SendMessage) -> ConversationResult<SentMessage> {
        let prepared = self.prepare(sender_id, request).await?;
        self.commit(sender_id, prepared).await
    }

    /// Start or continue the sender's conversation about a listing.
    pub async fn start(
        &self,
        sender_id: i64,
        listing_id: &str,
        content: &str,
    ) -> ConversationResult<SentMessage> {
        self.send(sender_id, &SendMessage::about_listing(listing_id, content))
            .await
    }

    /// Post into an existing conversation the sender belongs to.
    pub async fn post(
        &self,
        sender_id: i64,
        conversation_id: &str,
        content: &str,
    ) -> ConversationResult<SentMessage> {
        self.send(sender_id, &SendMessage::to_conversation(conversation_id, content))
            .await
    }

    /// Run every precondition and resolve where the message goes. Nothing is
    /// written here; content is validated before any lookup.
    pub async fn prepare(
        &self,
        sender_id: i64,
        request: &SendMessage,
    ) -> ConversationResult<PreparedSend> {
        let content = normalize_content(&request.content, self.max_message_length)?;

        match (&request.conversation_id, &request.listing_id) {
            (Some(conversation_id), _) => {
                self.prepare_post(sender_id, conversation_id, content).await
            }
            (None, Some(listing_id)) => self.prepare_start(sender_id, listing_id, content).await,
            (None, None) => Err(ConversationError::validation(
                "Either conversation_id or listing_id is required",
            )),
        }
    }

    /// Store the prepared message and bump the conversation activity. A
    /// first message about a listing creates its conversation in the same
    /// transaction.
    pub async fn commit(
        &self,
        sender_id: i64,
        prepared: PreparedSend,
    ) -> ConversationResult<SentMessage> {
        let (conversation, message, created) = match prepared.target {
            SendTarget::Existing(conversation) => {
                let message = self
                    .store
                    .append_message(&conversation, sender_id, &prepared.content)
                    .await?;
                (conversation, message, false)
            }
            SendTarget::Thread(thread) => {
                self.store
                    .start_conversation(thread, sender_id, &prepared.content)
                    .await?
            }
        };

        info!(
            conversation_id = conversation.id,
            sender_id,
            created,
            "message accepted"
        );

        Ok(SentMessage {
            conversation,
            message,
            recipient_id: prepared.recipient_id,
            created,
        })
    }

    async fn prepare_start(
        &self,
        sender_id: i64,
        listing_id: &str,
        content: String,
    ) -> ConversationResult<PreparedSend> {
        validate_public_id("listing", listing_id)?;

        let listing = self
            .store
            .find_listing(listing_id)
            .await?
            .filter(|listing| listing.active)
            .ok_or_else(|| ConversationError::listing_not_found(listing_id))?;

        if listing.owner_id == sender_id {
            return Err(ConversationError::OwnListing);
        }

        let participants =
            ParticipantPair::new(sender_id, listing.owner_id).ok_or(ConversationError::OwnListing)?;

        Ok(PreparedSend {
            target: SendTarget::Thread(ThreadKey {
                listing_id: listing.id,
                participants,
            }),
            recipient_id: listing.owner_id,
            content,
        })
    }

    async fn prepare_post(
        &self,
        sender_id: i64,
        conversation_id: &str,
        content: String,
    ) -> ConversationResult<PreparedSend> {
        let conversation =
            participant_conversation(self.store.as_ref(), sender_id, conversation_id).await?;

        let recipient_id = conversation
            .other_participant(sender_id)
            .ok_or_else(|| ConversationError::internal("conversation has no counterpart"))?;

        Ok(PreparedSend {
            target: SendTarget::Existing(conversation),
            recipient_id,
            content,
        })
    }
}
