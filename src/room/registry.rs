//! Registry of live rooms and of which room each connection is in

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::store::BlockArchive;
use crate::ws::broadcast::SyncBroadcaster;
use crate::ws::protocol::ClientMsg;

use super::actor::{RoomActor, RoomHandle};
use super::state::{RoomSnapshot, RoomState};
use super::{ConnectionId, Player, RoomCommand, RoomError, RoomId, RoomSettings};

/// A join that races a room's teardown is retried on a fresh room
const JOIN_ATTEMPTS: usize = 3;

/// Creates rooms on first join and forgets them when their actor shuts down
pub struct RoomRegistry {
    rooms: Arc<DashMap<RoomId, RoomHandle>>,
    connections: DashMap<ConnectionId, RoomId>,
    broadcaster: Arc<SyncBroadcaster>,
    archive: BlockArchive,
    settings: RoomSettings,
    next_generation: AtomicU64,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, broadcaster: Arc<SyncBroadcaster>, archive: BlockArchive) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            connections: DashMap::new(),
            broadcaster,
            archive,
            settings,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Join `room_id`, creating it if needed.
    ///
    /// A connection already in another room leaves it only once the new room
    /// has accepted it. On `RoomFull` nothing changes, not even for this connection.
    pub async fn join(&self, room_id: &str, player: Player) -> Result<RoomSnapshot, RoomError> {
        let connection_id = player.connection_id;
        let previous = self.room_of(&connection_id);

        if previous.as_deref() == Some(room_id) {
            debug!(connection_id = %connection_id, room_id = %room_id, "Already in room");
            return self.snapshot(room_id).await.ok_or(RoomError::RoomClosed);
        }

        let snapshot = self.admit(room_id, player).await?;

        if let Some(previous) = previous {
            debug!(connection_id = %connection_id, from = %previous, to = %room_id, "Switching rooms");
            self.leave_room(&previous, connection_id).await;
        }
        self.connections.insert(connection_id, room_id.to_string());
        Ok(snapshot)
    }

    /// Send the join to the live room, retrying on a fresh room if it is tearing down
    async fn admit(&self, room_id: &str, player: Player) -> Result<RoomSnapshot, RoomError> {
        for attempt in 1..=JOIN_ATTEMPTS {
            let handle = self.get_or_spawn(room_id);
            let (reply, rx) = oneshot::channel();
            let command = RoomCommand::Join {
                player: player.clone(),
                reply,
            };

            let outcome = match handle.commands.send(command).await {
                Ok(()) => rx.await.unwrap_or(Err(RoomError::RoomClosed)),
                Err(_) => Err(RoomError::RoomClosed),
            };

            match outcome {
                Ok(snapshot) => return Ok(snapshot),
                Err(RoomError::RoomClosed) => {
                    debug!(room_id = %room_id, attempt, "Room closed during join, retrying");
                    self.rooms
                        .remove_if(room_id, |_, h| h.generation == handle.generation);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(room_id = %room_id, "Giving up on join after repeated teardown races");
        Err(RoomError::RoomClosed)
    }

    /// Remove a connection from its room. Returns once the room has processed it.
    pub async fn leave(&self, connection_id: &ConnectionId) {
        let Some((_, room_id)) = self.connections.remove(connection_id) else {
            return;
        };
        self.leave_room(&room_id, *connection_id).await;
    }

    async fn leave_room(&self, room_id: &str, connection_id: ConnectionId) {
        let Some(handle) = self.handle(room_id) else {
            return;
        };

        let (reply, rx) = oneshot::channel();
        let command = RoomCommand::Leave {
            connection_id,
            reply,
        };
        if handle.commands.send(command).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.connections.get(connection_id).map(|r| r.value().clone())
    }

    /// Forward a client event to the connection's room
    pub async fn dispatch(&self, connection_id: ConnectionId, msg: ClientMsg) -> Result<(), RoomError> {
        let room_id = self.room_of(&connection_id).ok_or(RoomError::NotJoined)?;
        let handle = self.handle(&room_id).ok_or(RoomError::RoomClosed)?;

        handle
            .commands
            .send(RoomCommand::Client { connection_id, msg })
            .await
            .map_err(|_| RoomError::RoomClosed)
    }

    /// Current state of a live room
    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let handle = self.handle(room_id)?;
        let (reply, rx) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Snapshot { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    fn handle(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    fn get_or_spawn(&self, room_id: &str) -> RoomHandle {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.spawn_room(room_id))
            .value()
            .clone()
    }

    fn spawn_room(&self, room_id: &str) -> RoomHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let state = RoomState::new(room_id.to_string(), self.settings.clone());
        let (actor, handle) = RoomActor::new(
            state,
            generation,
            self.settings.tick_rate,
            self.rooms.clone(),
            self.broadcaster.clone(),
            self.archive.clone(),
        );

        info!(room_id = %room_id, generation, physics = %self.settings.physics_mode, "Spawning room");
        tokio::spawn(actor.run());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::PhysicsMode;
    use crate::ws::protocol::{NewMessage, ServerMsg};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn registry(mode: PhysicsMode) -> (RoomRegistry, Arc<SyncBroadcaster>) {
        let broadcaster = Arc::new(SyncBroadcaster::new());
        let settings = RoomSettings {
            physics_mode: mode,
            ..RoomSettings::default()
        };
        (
            RoomRegistry::new(settings, broadcaster.clone(), BlockArchive::disabled()),
            broadcaster,
        )
    }

    fn connect(broadcaster: &SyncBroadcaster, user: &str) -> (Player, mpsc::Receiver<ServerMsg>) {
        let connection_id = Uuid::new_v4();
        let rx = broadcaster.register(connection_id);
        let player = Player {
            connection_id,
            user_id: user.into(),
            color1: "#111".into(),
            color2: "#222".into(),
        };
        (player, rx)
    }

    fn post(text: &str) -> ClientMsg {
        ClientMsg::NewMessage(NewMessage {
            room: None,
            text: text.into(),
            x: 100.0,
            y: 100.0,
            user_id: None,
            color1: None,
            color2: None,
        })
    }

    async fn next_event(rx: &mut mpsc::Receiver<ServerMsg>, name: &str) -> ServerMsg {
        timeout(Duration::from_secs(2), async {
            loop {
                let msg = rx.recv().await.expect("connection queue open");
                if msg.event_name() == name {
                    return msg;
                }
            }
        })
        .await
        .expect("event arrived in time")
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let mut members = Vec::new();
        for user in ["a", "b", "c", "d"] {
            let (player, rx) = connect(&broadcaster, user);
            assert_ok!(registry.join("lobby", player.clone()).await);
            members.push((player, rx));
        }

        let (fifth, _rx) = connect(&broadcaster, "e");
        let err = assert_err!(registry.join("lobby", fifth.clone()).await);
        assert!(matches!(err, RoomError::RoomFull { capacity: 4, .. }));

        assert!(registry.room_of(&fifth.connection_id).is_none());
        assert_eq!(registry.total_players(), 4);
        let snapshot = registry.snapshot("lobby").await.unwrap();
        let users: Vec<_> = snapshot.players.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(users, vec!["a", "b", "c", "d"]);
        for (player, _) in &members {
            assert_eq!(registry.room_of(&player.connection_id).as_deref(), Some("lobby"));
        }
    }

    #[tokio::test]
    async fn test_room_released_after_last_leave() {
        let (registry, broadcaster) = registry(PhysicsMode::Server);
        let (alice, mut rx) = connect(&broadcaster, "alice");

        let snapshot = registry.join("studio", alice.clone()).await.unwrap();
        assert!(snapshot.blocks.is_empty());
        let first_seed = snapshot.artifact_seed;

        registry.dispatch(alice.connection_id, post("hello")).await.unwrap();
        next_event(&mut rx, "newMessage").await;
        assert_eq!(registry.snapshot("studio").await.unwrap().blocks.len(), 1);

        registry.leave(&alice.connection_id).await;
        assert_eq!(registry.active_rooms(), 0);
        assert_eq!(broadcaster.room_members("studio"), 0);
        assert!(registry.room_of(&alice.connection_id).is_none());

        let snapshot = registry.join("studio", alice.clone()).await.unwrap();
        assert!(snapshot.blocks.is_empty());
        assert_ne!(snapshot.artifact_seed, first_seed);
        assert_eq!(registry.active_rooms(), 1);
    }

    #[tokio::test]
    async fn test_events_stay_in_their_room() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, mut rx_a) = connect(&broadcaster, "a");
        let (b, mut rx_b) = connect(&broadcaster, "b");
        registry.join("room-a", a.clone()).await.unwrap();
        registry.join("room-b", b.clone()).await.unwrap();

        registry.dispatch(a.connection_id, post("only in a")).await.unwrap();
        next_event(&mut rx_a, "newMessage").await;

        // Barrier: room-b has processed everything sent to it
        registry.snapshot("room-b").await.unwrap();
        while let Ok(msg) = rx_b.try_recv() {
            assert_ne!(msg.event_name(), "newMessage");
        }
    }

    #[tokio::test]
    async fn test_foreign_move_is_not_broadcast() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, mut rx_a) = connect(&broadcaster, "a");
        let (b, mut rx_b) = connect(&broadcaster, "b");
        registry.join("shared", a.clone()).await.unwrap();
        registry.join("shared", b.clone()).await.unwrap();

        registry.dispatch(a.connection_id, post("a's block")).await.unwrap();
        let ServerMsg::NewMessage(block) = next_event(&mut rx_b, "newMessage").await else {
            unreachable!();
        };

        let attempt = ClientMsg::UpdatePosition(crate::ws::protocol::MoveBlock {
            id: block.id,
            x: 1.0,
            y: 1.0,
            angle: None,
            user_id: Some("a".into()),
        });
        registry.dispatch(b.connection_id, attempt).await.unwrap();

        let snapshot = registry.snapshot("shared").await.unwrap();
        assert_eq!((snapshot.blocks[0].x, snapshot.blocks[0].y), (100.0, 100.0));
        for rx in [&mut rx_a, &mut rx_b] {
            while let Ok(msg) = rx.try_recv() {
                assert_ne!(msg.event_name(), "updatePosition");
            }
        }
    }

    #[tokio::test]
    async fn test_player_list_follows_membership() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, mut rx_a) = connect(&broadcaster, "a");
        let (b, _rx_b) = connect(&broadcaster, "b");
        registry.join("r", a.clone()).await.unwrap();
        next_event(&mut rx_a, "playerList").await;

        registry.join("r", b.clone()).await.unwrap();
        let ServerMsg::PlayerList(list) = next_event(&mut rx_a, "playerList").await else {
            unreachable!();
        };
        assert_eq!(list.len(), 2);

        registry.leave(&b.connection_id).await;
        let ServerMsg::PlayerList(list) = next_event(&mut rx_a, "playerList").await else {
            unreachable!();
        };
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].user_id, "a");
        assert_eq!(registry.active_rooms(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_switches_rooms() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, _rx) = connect(&broadcaster, "a");
        registry.join("first", a.clone()).await.unwrap();
        registry.join("second", a.clone()).await.unwrap();

        assert_eq!(registry.room_of(&a.connection_id).as_deref(), Some("second"));
        assert_eq!(registry.active_rooms(), 1);
        assert!(registry.snapshot("first").await.is_none());
    }

    #[tokio::test]
    async fn test_full_room_keeps_player_in_current_room() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let mut members = Vec::new();
        for user in ["a", "b", "c", "d"] {
            let (player, rx) = connect(&broadcaster, user);
            registry.join("full", player).await.unwrap();
            members.push(rx);
        }

        let (e, _rx_e) = connect(&broadcaster, "e");
        registry.join("home", e.clone()).await.unwrap();
        registry.dispatch(e.connection_id, post("keep me")).await.unwrap();

        let err = assert_err!(registry.join("full", e.clone()).await);
        assert!(matches!(err, RoomError::RoomFull { .. }));

        assert_eq!(registry.room_of(&e.connection_id).as_deref(), Some("home"));
        let home = registry.snapshot("home").await.unwrap();
        assert_eq!(home.players.len(), 1);
        assert_eq!(home.blocks.len(), 1);
        assert_eq!(broadcaster.room_members("home"), 1);
        assert_eq!(registry.snapshot("full").await.unwrap().players.len(), 4);
        assert_eq!(registry.active_rooms(), 2);
    }

    #[tokio::test]
    async fn test_join_queued_behind_last_leave_gets_room_closed() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, _rx_a) = connect(&broadcaster, "a");
        let (b, _rx_b) = connect(&broadcaster, "b");
        registry.join("r", a.clone()).await.unwrap();
        let handle = registry.handle("r").unwrap();

        let (leave_tx, leave_rx) = oneshot::channel();
        let (join_tx, join_rx) = oneshot::channel();
        assert_ok!(
            handle
                .commands
                .send(RoomCommand::Leave { connection_id: a.connection_id, reply: leave_tx })
                .await
        );
        assert_ok!(
            handle
                .commands
                .send(RoomCommand::Join { player: b.clone(), reply: join_tx })
                .await
        );

        assert_ok!(leave_rx.await);
        assert_eq!(join_rx.await.unwrap().unwrap_err(), RoomError::RoomClosed);
        assert!(registry.handle("r").is_none());
    }

    #[tokio::test]
    async fn test_join_racing_teardown_lands_in_fresh_room() {
        let (registry, broadcaster) = registry(PhysicsMode::Client);
        let (a, mut rx_a) = connect(&broadcaster, "a");
        let (b, _rx_b) = connect(&broadcaster, "b");
        registry.join("r", a.clone()).await.unwrap();
        registry.dispatch(a.connection_id, post("old")).await.unwrap();
        next_event(&mut rx_a, "newMessage").await;
        let old = registry.handle("r").unwrap();

        // The last leave is queued ahead of the join, which then targets the dying room
        let (leave_tx, _leave_rx) = oneshot::channel();
        assert_ok!(
            old.commands
                .send(RoomCommand::Leave { connection_id: a.connection_id, reply: leave_tx })
                .await
        );
        let snapshot = assert_ok!(registry.join("r", b.clone()).await);

        assert!(snapshot.blocks.is_empty());
        let users: Vec<_> = snapshot.players.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(users, vec!["b"]);
        let fresh = registry.handle("r").unwrap();
        assert_ne!(fresh.generation, old.generation);
        assert_eq!(registry.room_of(&b.connection_id).as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_dispatch_requires_join() {
        let (registry, _) = registry(PhysicsMode::Client);
        let err = assert_err!(registry.dispatch(Uuid::new_v4(), post("lost")).await);
        assert_eq!(err, RoomError::NotJoined);
    }
}
