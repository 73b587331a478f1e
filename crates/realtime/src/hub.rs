//! The chat hub ties conversation services to live fan-out.
//!
//! Both transports go through the hub, so a message posted over REST reaches
//! live sockets exactly like one sent over a socket.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use souk_config::MessagingConfig;
use souk_conversations::{
    Conversation, ConversationError, ConversationResult, ConversationServices,
    ConversationSummary, HistoryPage, ReadReceipt, SendMessage, SentMessage,
    ThreadKey,
};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::events::ServerEvent;
use crate::fanout::{conversation_room, plan_message, plan_read, plan_typing, Dispatch};
use crate::registry::SessionRegistry;
use crate::rooms::{ConnectionHandle, ConnectionId, RoomMultiplexer};

/// An authenticated user as the hub sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub public_id: String,
}

/// One async mutex per conversation thread, created on demand and dropped
/// once no task holds it. Keyed by thread so a first message about a listing
/// serialises with later sends before its row exists.
#[derive(Clone, Default)]
struct ConversationLocks {
    inner: Arc<Mutex<HashMap<ThreadKey, Weak<Mutex<()>>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, thread: ThreadKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            locks.retain(|_, lock| lock.strong_count() > 0);

            match locks.get(&thread).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(thread, Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct ChatHub {
    services: ConversationServices,
    registry: SessionRegistry,
    locks: ConversationLocks,
    mark_read_on_fetch: bool,
}

impl ChatHub {
    pub fn new(
        services: ConversationServices,
        registry: SessionRegistry,
        config: &MessagingConfig,
    ) -> Self {
        Self {
            services,
            registry,
            locks: ConversationLocks::default(),
            mark_read_on_fetch: config.mark_read_on_fetch,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomMultiplexer {
        self.registry.rooms()
    }

    pub fn services(&self) -> &ConversationServices {
        &self.services
    }

    /// Register an authenticated connection and greet it.
    pub async fn connect(
        &self,
        principal: &Principal,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> ConnectionHandle {
        let connection = self.registry.register(principal.user_id, outbound).await;
        connection.send(ServerEvent::Hello {
            user_id: principal.public_id.clone(),
            session_id: connection.id().to_string(),
        });
        connection
    }

    pub async fn disconnect(&self, connection: &ConnectionHandle) {
        self.registry.unregister(connection.id()).await;
    }

    pub async fn join_conversation(
        &self,
        connection: &ConnectionHandle,
        conversation_id: &str,
    ) -> ConversationResult<Conversation> {
        let conversation = self
            .services
            .queries
            .require_participant(connection.principal_id(), conversation_id)
            .await?;

        self.rooms()
            .join(connection, conversation_room(&conversation))
            .await;

        Ok(conversation)
    }

    pub async fn leave_conversation(
        &self,
        connection: &ConnectionHandle,
        conversation_id: &str,
    ) -> ConversationResult<Conversation> {
        let conversation = self
            .services
            .queries
            .require_participant(connection.principal_id(), conversation_id)
            .await?;

        self.rooms()
            .leave(connection.id(), &conversation_room(&conversation))
            .await;

        Ok(conversation)
    }

    /// Persist a message and fan it out. Persistence and delivery run under
    /// the conversation lock, so live order matches stored order.
    ///
    /// A socket that starts a thread about a listing is joined to the
    /// conversation room before the message is delivered.
    pub async fn send(
        &self,
        principal: &Principal,
        origin: Option<&ConnectionHandle>,
        request: &SendMessage,
    ) -> ConversationResult<SentMessage> {
        let prepared = self
            .services
            .ingress
            .prepare(principal.user_id, request)
            .await?;

        let _guard = self.locks.acquire(prepared.thread_key()).await;
        let sent = self
            .services
            .ingress
            .commit(principal.user_id, prepared)
            .await?;

        if let Some(connection) = origin {
            let room = conversation_room(&sent.conversation);
            if request.conversation_id.is_none()
                && !self.rooms().is_member(connection.id(), &room).await
            {
                self.rooms().join(connection, room).await;
                connection.send(ServerEvent::Joined {
                    conversation_id: sent.conversation.public_id.clone(),
                });
            }
        }

        self.execute(plan_message(&sent)).await;
        Ok(sent)
    }

    /// Relay a typing indicator to the other members of a joined
    /// conversation room.
    pub async fn typing(
        &self,
        principal: &Principal,
        connection: &ConnectionHandle,
        conversation_id: &str,
    ) -> ConversationResult<()> {
        let conversation = self
            .services
            .queries
            .require_participant(principal.user_id, conversation_id)
            .await?;

        if !self
            .rooms()
            .is_member(connection.id(), &conversation_room(&conversation))
            .await
        {
            return Err(ConversationError::access_denied(
                "Join the conversation before sending typing indicators",
            ));
        }

        self.execute([plan_typing(&conversation, &principal.public_id, connection.id())])
            .await;
        Ok(())
    }

    /// Mark the principal's incoming messages read and tell the rest of the
    /// room. `origin` is excluded from the announcement.
    pub async fn mark_read(
        &self,
        principal: &Principal,
        origin: Option<ConnectionId>,
        conversation_id: &str,
    ) -> ConversationResult<ReadReceipt> {
        let conversation = self
            .services
            .queries
            .require_participant(principal.user_id, conversation_id)
            .await?;

        self.mark_conversation_read(principal, origin, conversation)
            .await
    }

    /// One page of history. Incoming messages are marked read first when
    /// `messaging.mark_read_on_fetch` is enabled.
    pub async fn history(
        &self,
        principal: &Principal,
        origin: Option<ConnectionId>,
        conversation_id: &str,
        page: u32,
    ) -> ConversationResult<HistoryPage> {
        if page == 0 {
            return Err(ConversationError::validation("page starts at 1"));
        }

        let conversation = self
            .services
            .queries
            .require_participant(principal.user_id, conversation_id)
            .await?;

        if self.mark_read_on_fetch {
            self.mark_conversation_read(principal, origin, conversation.clone())
                .await?;
        }

        self.services.queries.history_of(conversation, page).await
    }

    pub async fn list_conversations(
        &self,
        user_id: i64,
    ) -> ConversationResult<Vec<ConversationSummary>> {
        self.services.queries.list(user_id).await
    }

    pub async fn unread_total(&self, user_id: i64) -> ConversationResult<i64> {
        self.services.queries.unread_total(user_id).await
    }

    async fn mark_conversation_read(
        &self,
        principal: &Principal,
        origin: Option<ConnectionId>,
        conversation: Conversation,
    ) -> ConversationResult<ReadReceipt> {
        let _guard = self.locks.acquire(conversation.thread_key()).await;
        let receipt = self
            .services
            .read_tracker
            .mark_conversation_read(principal.user_id, conversation)
            .await?;

        if let Some(dispatch) = plan_read(&receipt, &principal.public_id, origin) {
            self.execute([dispatch]).await;
        }

        Ok(receipt)
    }

    async fn execute(&self, plan: impl IntoIterator<Item = Dispatch>) {
        for dispatch in plan {
            debug!(
                room = %dispatch.room,
                event = dispatch.event.kind(),
                "dispatching"
            );
            self.rooms()
                .dispatch(dispatch.room, dispatch.except, dispatch.event)
                .await;
        }
    }
}
