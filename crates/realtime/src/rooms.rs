//! Room membership and local delivery.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BroadcastBus, BusEnvelope};
use crate::events::ServerEvent;

pub type ConnectionId = Uuid;

/// Outbound buffer per connection. A connection that falls this far behind
/// starts missing events.
pub const OUTBOUND_BUFFER: usize = 256;

/// Fan-out target. Users have an implicit personal room, conversations are
/// joined explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoomId {
    User(i64),
    Conversation(i64),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

impl FromStr for RoomId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| format!("malformed room id {value}"))?;
        let id: i64 = id.parse().map_err(|_| format!("malformed room id {value}"))?;

        match kind {
            "user" => Ok(Self::User(id)),
            "conversation" => Ok(Self::Conversation(id)),
            _ => Err(format!("unknown room namespace {kind}")),
        }
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

impl TryFrom<String> for RoomId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A live transport channel belonging to one principal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    principal_id: i64,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(principal_id: i64, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn principal_id(&self) -> i64 {
        self.principal_id
    }

    /// Queue an event without waiting. Returns false if the event was
    /// dropped because the connection is closed or saturated.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    connection_id = %self.id,
                    user_id = self.principal_id,
                    event = event.kind(),
                    "outbound buffer full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "connection closed, dropping event");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomTable {
    fn remove(&mut self, connection_id: ConnectionId, room: &RoomId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(members) => {
                let removed = members.remove(&connection_id).is_some();
                if members.is_empty() {
                    self.rooms.remove(room);
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(&connection_id);
            }
        }

        removed
    }
}

/// Owns room membership and delivers events to the members of a room.
///
/// Delivery is best effort and at most once. Broadcasts are serialised by
/// the table lock, so every member of a room sees events in call order.
/// With a bus attached every broadcast is also published for other nodes.
#[derive(Clone)]
pub struct RoomMultiplexer {
    table: Arc<Mutex<RoomTable>>,
    bus: Option<Arc<dyn BroadcastBus>>,
}

impl Default for RoomMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomMultiplexer {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(RoomTable::default())),
            bus: None,
        }
    }

    pub fn with_bus(bus: Arc<dyn BroadcastBus>) -> Self {
        Self {
            table: Arc::new(Mutex::new(RoomTable::default())),
            bus: Some(bus),
        }
    }

    pub async fn join(&self, connection: &ConnectionHandle, room: RoomId) {
        let mut table = self.table.lock().await;
        table
            .rooms
            .entry(room)
            .or_default()
            .insert(connection.id(), connection.clone());
        table
            .memberships
            .entry(connection.id())
            .or_default()
            .insert(room);

        debug!(connection_id = %connection.id(), %room, "joined room");
    }

    pub async fn leave(&self, connection_id: ConnectionId, room: &RoomId) -> bool {
        let removed = self.table.lock().await.remove(connection_id, room);
        if removed {
            debug!(%connection_id, %room, "left room");
        }
        removed
    }

    /// Remove the connection from every room it belongs to.
    pub async fn leave_all(&self, connection_id: ConnectionId) -> usize {
        let mut table = self.table.lock().await;
        let rooms: Vec<RoomId> = table
            .memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default();

        for room in &rooms {
            table.remove(connection_id, room);
        }

        rooms.len()
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room: &RoomId) -> bool {
        self.table
            .lock()
            .await
            .memberships
            .get(&connection_id)
            .is_some_and(|rooms| rooms.contains(room))
    }

    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.table
            .lock()
            .await
            .rooms
            .get(room)
            .map_or(0, HashMap::len)
    }

    /// Deliver to every member of the room. Returns the number of local
    /// connections the event was queued for.
    pub async fn broadcast(&self, room: RoomId, event: ServerEvent) -> usize {
        self.dispatch(room, None, event).await
    }

    /// Deliver to every member of the room except one connection.
    pub async fn broadcast_except(
        &self,
        connection_id: ConnectionId,
        room: RoomId,
        event: ServerEvent,
    ) -> usize {
        self.dispatch(room, Some(connection_id), event).await
    }

    pub async fn dispatch(
        &self,
        room: RoomId,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let delivered = self.deliver_local(&room, except, &event).await;

        if let Some(bus) = &self.bus {
            let envelope = BusEnvelope {
                origin: bus.node_id(),
                room,
                except,
                event,
            };
            if let Err(error) = bus.publish(&envelope).await {
                warn!(%room, %error, "failed to publish broadcast to bus");
            }
        }

        delivered
    }

    /// Deliver to members on this node only. Used for bus traffic from
    /// other nodes.
    pub async fn deliver_local(
        &self,
        room: &RoomId,
        except: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let table = self.table.lock().await;
        let Some(members) = table.rooms.get(room) else {
            debug!(%room, event = event.kind(), "no local members");
            return 0;
        };

        let delivered = members
            .values()
            .filter(|connection| Some(connection.id()) != except)
            .filter(|connection| connection.send(event.clone()))
            .count();

        debug!(%room, event = event.kind(), delivered, "broadcast delivered");
        delivered
    }
}
