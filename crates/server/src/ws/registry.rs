// Connection registry: the single shared mutable structure of the relay.
//
// Owns every open WebSocket connection. A connection is admitted
// unconditionally and may gain an identity later; unauthenticated
// connections stay in the registry but are invisible in the roster and
// receive no direct messages. All mutation goes through the RwLock, so
// roster computation and fan-out always observe a consistent membership.

use std::{collections::HashMap, sync::Arc};

use parley_common::protocol::ws::{RosterFrame, ServerFrame};
use parley_common::types::{Identity, OnlineUser};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Opaque handle for one admitted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionRecord {
    identity: Option<Identity>,
    alive: bool,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admit a connection unconditionally. The returned handle is unique;
    /// the connection starts unauthenticated.
    pub async fn admit(&self, outbound: mpsc::UnboundedSender<ServerFrame>) -> ConnectionId {
        let id = ConnectionId(Uuid::new_v4());
        let record = ConnectionRecord { identity: None, alive: true, outbound };
        self.connections.write().await.insert(id, record);
        id
    }

    /// Attach a verified identity to an admitted connection. Returns false
    /// when the connection has already been evicted.
    pub async fn identify(&self, id: ConnectionId, identity: Identity) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(record) => {
                record.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    /// Mark a connection dead (heartbeat timeout) without removing it yet.
    pub async fn mark_dead(&self, id: ConnectionId) {
        if let Some(record) = self.connections.write().await.get_mut(&id) {
            record.alive = false;
        }
    }

    /// Remove a connection. Idempotent: evicting an unknown or already
    /// evicted handle is a no-op returning false.
    pub async fn evict(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    pub async fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.connections.read().await.get(&id).and_then(|record| record.identity.clone())
    }

    /// The online roster: every authenticated, live connection.
    pub async fn roster(&self) -> Vec<OnlineUser> {
        self.connections
            .read()
            .await
            .values()
            .filter(|record| record.alive)
            .filter_map(|record| record.identity.as_ref())
            .map(|identity| OnlineUser {
                user_id: identity.user_id,
                username: identity.username.clone(),
            })
            .collect()
    }

    /// Push the current roster to every admitted connection, authenticated
    /// or not. One full pass per call; no debouncing.
    pub async fn announce(&self) {
        let guard = self.connections.read().await;
        let online: Vec<OnlineUser> = guard
            .values()
            .filter(|record| record.alive)
            .filter_map(|record| record.identity.as_ref())
            .map(|identity| OnlineUser {
                user_id: identity.user_id,
                username: identity.username.clone(),
            })
            .collect();

        for record in guard.values() {
            // A closed receiver means the connection is tearing down; its
            // eviction will trigger the next announcement.
            let _ = record
                .outbound
                .send(ServerFrame::Roster(RosterFrame { online: online.clone() }));
        }
    }

    /// Deliver a frame to every live connection authenticated as `user_id`
    /// (multi-device). Returns the number of connections reached. Sending
    /// to a connection that has since closed is a safe no-op.
    pub async fn send_to_user(&self, user_id: Uuid, frame: ServerFrame) -> usize {
        let guard = self.connections.read().await;
        let mut delivered = 0;
        for record in guard.values() {
            let is_recipient = record
                .identity
                .as_ref()
                .is_some_and(|identity| identity.user_id == user_id);
            if is_recipient && record.outbound.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
