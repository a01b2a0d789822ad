//! Room actor: single writer for one room's state

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::BlockArchive;
use crate::util::time::Timer;
use crate::ws::broadcast::SyncBroadcaster;
use crate::ws::protocol::ServerMsg;

use super::state::{Outbound, RoomState};
use super::{RoomCommand, RoomError, RoomId};

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    /// Distinguishes successive rooms that reuse the same id
    pub generation: u64,
    pub commands: mpsc::Sender<RoomCommand>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Owns a [`RoomState`] and processes its commands and ticks one at a time
pub struct RoomActor {
    state: RoomState,
    generation: u64,
    commands: mpsc::Receiver<RoomCommand>,
    rooms: Arc<DashMap<RoomId, RoomHandle>>,
    broadcaster: Arc<SyncBroadcaster>,
    archive: BlockArchive,
    player_count: Arc<AtomicUsize>,
    tick_duration: Duration,
}

impl RoomActor {
    pub fn new(
        state: RoomState,
        generation: u64,
        tick_rate: u32,
        rooms: Arc<DashMap<RoomId, RoomHandle>>,
        broadcaster: Arc<SyncBroadcaster>,
        archive: BlockArchive,
    ) -> (Self, RoomHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            generation,
            commands: commands_tx,
            player_count: player_count.clone(),
        };

        let actor = Self {
            state,
            generation,
            commands: commands_rx,
            rooms,
            broadcaster,
            archive,
            player_count,
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
        };

        (actor, handle)
    }

    /// Run until the last player leaves
    pub async fn run(mut self) {
        info!(room_id = %self.state.id(), generation = self.generation, "Room created");

        let simulated = self.state.physics().is_some();
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = tick_interval.tick(), if simulated => {
                    self.run_tick();
                }
            }
        }

        self.shutdown().await;
    }

    /// Returns false once the room should be destroyed
    fn handle_command(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Join { player, reply } => {
                let connection_id = player.connection_id;
                match self.state.join(player) {
                    Ok((snapshot, outbound)) => {
                        self.broadcaster.subscribe(self.state.id(), connection_id);
                        debug!(
                            room_id = %self.state.id(),
                            members = self.broadcaster.room_members(self.state.id()),
                            "Connection subscribed"
                        );
                        self.sync_player_count();
                        self.dispatch(outbound);
                        let _ = reply.send(Ok(snapshot));
                    }
                    Err(e) => {
                        warn!(
                            room_id = %self.state.id(),
                            connection_id = %connection_id,
                            error = %e,
                            "Join rejected"
                        );
                        let _ = reply.send(Err(e));
                    }
                }
            }
            RoomCommand::Leave {
                connection_id,
                reply,
            } => {
                self.broadcaster.unsubscribe(self.state.id(), &connection_id);
                if let Some((_, outbound)) = self.state.leave(&connection_id) {
                    self.sync_player_count();
                    self.dispatch(outbound);
                }
                if self.state.is_empty() {
                    // Deregister before acknowledging so the caller observes the teardown
                    self.deregister();
                }
                let _ = reply.send(());
            }
            RoomCommand::Client { connection_id, msg } => {
                match self.state.handle(connection_id, msg) {
                    Ok(outbound) => self.dispatch(outbound),
                    Err(RoomError::OwnershipViolation { .. }) => {
                        // Already logged by the ownership check
                    }
                    Err(RoomError::UnknownBlock(id)) => {
                        debug!(room_id = %self.state.id(), block_id = %id, "Event for unknown block");
                    }
                    Err(e) => {
                        warn!(
                            room_id = %self.state.id(),
                            connection_id = %connection_id,
                            error = %e,
                            "Dropping client event"
                        );
                    }
                }
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }

        !self.state.is_empty()
    }

    fn run_tick(&mut self) {
        let timer = Timer::new();
        let outbound = self.state.tick();
        self.dispatch(outbound);

        let elapsed = timer.elapsed_micros();
        if elapsed > self.tick_duration.as_micros() as u64 {
            debug!(
                room_id = %self.state.id(),
                tick = self.state.tick_count(),
                elapsed_micros = elapsed,
                bodies = self.state.physics().map_or(0, |p| p.body_count()),
                drags = self.state.physics().map_or(0, |p| p.drag_count()),
                "Tick overran its budget"
            );
        }
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for delivery in outbound {
            self.archive_effect(delivery.msg());
            self.broadcaster.deliver(self.state.id(), delivery);
        }
    }

    /// Mirror block lifecycle changes into the archive (fire-and-forget)
    fn archive_effect(&self, msg: &ServerMsg) {
        match msg {
            ServerMsg::NewMessage(block) => self.archive.record_created(block),
            ServerMsg::UpdateOpacity(update) => self.archive.record_opacity(update.id, update.opacity),
            ServerMsg::RemoveMessage(removed) => self.archive.record_removed(removed.id),
            _ => {}
        }
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.state.player_count(), Ordering::Relaxed);
    }

    fn deregister(&self) {
        let generation = self.generation;
        self.rooms
            .remove_if(self.state.id(), |_, handle| handle.generation == generation);
    }

    /// Refuse queued joins and release the room
    async fn shutdown(mut self) {
        self.deregister();
        self.commands.close();

        while let Some(command) = self.commands.recv().await {
            match command {
                RoomCommand::Join { reply, .. } => {
                    let _ = reply.send(Err(RoomError::RoomClosed));
                }
                RoomCommand::Leave { reply, .. } => {
                    let _ = reply.send(());
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.snapshot());
                }
                RoomCommand::Client { .. } => {}
            }
        }

        info!(
            room_id = %self.state.id(),
            generation = self.generation,
            blocks_released = self.state.blocks().len(),
            "Room destroyed"
        );
    }
}
