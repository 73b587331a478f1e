//! Cross-node broadcast bus.
//!
//! Every node delivers its own broadcasts locally and publishes an envelope;
//! listeners on the other nodes replay it to their local room members.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use souk_config::RealtimeConfig;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::ServerEvent;
use crate::rooms::{ConnectionId, RoomId, RoomMultiplexer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub origin: Uuid,
    pub room: RoomId,
    pub except: Option<ConnectionId>,
    pub event: ServerEvent,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Identifies this node so it can skip its own envelopes.
    fn node_id(&self) -> Uuid;

    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BusError>;
}

/// Replay an envelope from another node to local members.
async fn replay(node_id: Uuid, payload: &str, rooms: &RoomMultiplexer) {
    let envelope: BusEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%error, "discarding malformed bus envelope");
            return;
        }
    };

    if envelope.origin == node_id {
        return;
    }

    let delivered = rooms
        .deliver_local(&envelope.room, envelope.except, &envelope.event)
        .await;
    debug!(
        room = %envelope.room,
        origin = %envelope.origin,
        delivered,
        "replayed remote broadcast"
    );
}

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(250);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Replay payloads from `stream`; whenever it ends, call `resubscribe` with
/// exponential backoff until a new stream is available. Runs until aborted.
async fn listen<F, Fut>(
    node_id: Uuid,
    channel: String,
    rooms: RoomMultiplexer,
    mut stream: BoxStream<'static, String>,
    mut resubscribe: F,
    initial_backoff: Duration,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BoxStream<'static, String>, BusError>>,
{
    loop {
        while let Some(payload) = stream.next().await {
            replay(node_id, &payload, &rooms).await;
        }
        warn!(%channel, "bus subscription ended, resubscribing");

        let mut backoff = initial_backoff;
        stream = loop {
            tokio::time::sleep(backoff).await;
            match resubscribe().await {
                Ok(stream) => {
                    info!(%channel, "bus subscription restored");
                    break stream;
                }
                Err(error) => {
                    warn!(%error, %channel, ?backoff, "bus resubscribe failed");
                    backoff = (backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
                }
            }
        };
    }
}

/// In-process bus. Each [`MemoryBus::attach`] call creates another node on
/// the same channel, which is how several hubs share one process in tests
/// and embedded setups.
#[derive(Clone)]
pub struct MemoryBus {
    node_id: Uuid,
    sender: broadcast::Sender<String>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            node_id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn attach(&self) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            sender: self.sender.clone(),
        }
    }

    pub fn spawn_listener(&self, rooms: RoomMultiplexer) -> JoinHandle<()> {
        let node_id = self.node_id;
        let mut receiver = self.sender.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => replay(node_id, &payload, &rooms).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl BroadcastBus for MemoryBus {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(envelope)?;
        // No subscribers just means no other node is listening.
        let _ = self.sender.send(payload);
        Ok(())
    }
}

/// Redis pub/sub bus shared by every node pointing at the same channel.
#[derive(Clone)]
pub struct RedisBus {
    node_id: Uuid,
    channel: String,
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(config: &RealtimeConfig, redis_url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client.clone()).await?;
        let node_id = Uuid::new_v4();

        info!(%node_id, channel = %config.channel, "redis broadcast bus connected");

        Ok(Self {
            node_id,
            channel: config.channel.clone(),
            client,
            connection,
        })
    }

    /// Subscribe to the channel and replay remote envelopes. A dropped
    /// subscription is re-established with backoff. Returns once the first
    /// subscription is active.
    pub async fn spawn_listener(&self, rooms: RoomMultiplexer) -> Result<JoinHandle<()>, BusError> {
        let stream = subscribe(&self.client, &self.channel).await?;

        let client = self.client.clone();
        let channel = self.channel.clone();
        let resubscribe = move || {
            let client = client.clone();
            let channel = channel.clone();
            async move { subscribe(&client, &channel).await }
        };

        Ok(tokio::spawn(listen(
            self.node_id,
            self.channel.clone(),
            rooms,
            stream,
            resubscribe,
            RESUBSCRIBE_BACKOFF,
        )))
    }
}

async fn subscribe(
    client: &redis::Client,
    channel: &str,
) -> Result<BoxStream<'static, String>, BusError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;

    Ok(pubsub
        .into_on_message()
        .filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(error) => {
                    warn!(%error, "discarding non-text bus payload");
                    None
                }
            }
        })
        .boxed())
}

#[async_trait]
impl BroadcastBus for RedisBus {
    fn node_id(&self) -> Uuid {
        self.node_id
    }

    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(envelope)?;
        let mut connection = self.connection.clone();
        connection
            .publish::<_, _, ()>(&self.channel, payload)
            .await?;
        Ok(())
    }
}
