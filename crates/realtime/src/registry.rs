use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::events::ServerEvent;
use crate::rooms::{ConnectionHandle, ConnectionId, RoomId, RoomMultiplexer};

pub type SessionId = ConnectionId;

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, ConnectionHandle>,
    by_principal: HashMap<i64, HashSet<SessionId>>,
}

/// Tracks the live connections of authenticated principals.
///
/// Callers authenticate before registering; registration itself never
/// fails. A principal may hold any number of sessions and each one joins
/// the principal's personal room.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<Sessions>>,
    rooms: RoomMultiplexer,
}

impl SessionRegistry {
    pub fn new(rooms: RoomMultiplexer) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Sessions::default())),
            rooms,
        }
    }

    pub fn rooms(&self) -> &RoomMultiplexer {
        &self.rooms
    }

    pub async fn register(
        &self,
        principal_id: i64,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> ConnectionHandle {
        let connection = ConnectionHandle::new(principal_id, outbound);

        {
            let mut sessions = self.sessions.write().await;
            sessions.by_id.insert(connection.id(), connection.clone());
            sessions
                .by_principal
                .entry(principal_id)
                .or_default()
                .insert(connection.id());
        }

        self.rooms.join(&connection, RoomId::User(principal_id)).await;

        info!(
            session_id = %connection.id(),
            user_id = principal_id,
            "session registered"
        );

        connection
    }

    /// Drop a session and all of its room memberships. Unknown ids are
    /// ignored.
    pub async fn unregister(&self, session_id: SessionId) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.by_id.remove(&session_id);
            if let Some(connection) = &removed {
                let principal_id = connection.principal_id();
                if let Some(ids) = sessions.by_principal.get_mut(&principal_id) {
                    ids.remove(&session_id);
                    if ids.is_empty() {
                        sessions.by_principal.remove(&principal_id);
                    }
                }
            }
            removed
        };

        let rooms_left = self.rooms.leave_all(session_id).await;

        if let Some(connection) = removed {
            info!(
                %session_id,
                user_id = connection.principal_id(),
                rooms_left,
                "session unregistered"
            );
        }
    }

    pub async fn connections_for(&self, principal_id: i64) -> Vec<ConnectionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .by_principal
            .get(&principal_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| sessions.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.by_id.len()
    }

    pub async fn is_online(&self, principal_id: i64) -> bool {
        self.sessions
            .read()
            .await
            .by_principal
            .contains_key(&principal_id)
    }
}
