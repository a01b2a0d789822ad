//! Fan-out of room events to live connections

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::room::{ConnectionId, Outbound, RoomId};
use crate::ws::protocol::ServerMsg;

/// Per-connection outbound queue depth
const CONNECTION_QUEUE: usize = 256;

/// Routes server messages to sockets. Never mutates room state.
#[derive(Default)]
pub struct SyncBroadcaster {
    connections: DashMap<ConnectionId, mpsc::Sender<ServerMsg>>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl SyncBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live socket and get the queue its writer task drains
    pub fn register(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerMsg> {
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        self.connections.insert(connection_id, tx);
        rx
    }

    pub fn unregister(&self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);
        self.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    pub fn subscribe(&self, room_id: &str, connection_id: ConnectionId) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub fn unsubscribe(&self, room_id: &str, connection_id: &ConnectionId) {
        self.rooms.remove_if_mut(room_id, |_, members| {
            members.remove(connection_id);
            members.is_empty()
        });
    }

    pub fn room_members(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send to a single connection. Returns false if it is gone or backed up.
    pub fn emit_to_one(&self, connection_id: &ConnectionId, msg: ServerMsg) -> bool {
        let Some(tx) = self.connections.get(connection_id).map(|t| t.value().clone()) else {
            debug!(connection_id = %connection_id, event = msg.event_name(), "No such connection");
            return false;
        };

        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(
                    connection_id = %connection_id,
                    event = msg.event_name(),
                    "Client lagged, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %connection_id, "Connection queue closed");
                false
            }
        }
    }

    pub fn emit_to_room(&self, room_id: &str, msg: ServerMsg) {
        self.fan_out(room_id, None, msg);
    }

    pub fn emit_to_room_except(&self, room_id: &str, except: &ConnectionId, msg: ServerMsg) {
        self.fan_out(room_id, Some(except), msg);
    }

    /// Route one delivery produced by a room
    pub fn deliver(&self, room_id: &str, outbound: Outbound) {
        match outbound {
            Outbound::Room(msg) => self.emit_to_room(room_id, msg),
            Outbound::RoomExcept(origin, msg) => self.emit_to_room_except(room_id, &origin, msg),
            Outbound::One(connection_id, msg) => {
                self.emit_to_one(&connection_id, msg);
            }
        }
    }

    fn fan_out(&self, room_id: &str, except: Option<&ConnectionId>, msg: ServerMsg) {
        // Copy the member list so no map guard is held while sending
        let members: Vec<ConnectionId> = match self.rooms.get(room_id) {
            Some(members) => members
                .iter()
                .filter(|c| Some(*c) != except)
                .copied()
                .collect(),
            None => return,
        };

        for connection_id in members {
            self.emit_to_one(&connection_id, msg.clone());
        }
    }
}
