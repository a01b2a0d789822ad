//! Authoritative state of one room
//!
//! [`RoomState`] is a plain synchronous state machine. Every operation returns
//! the ordered deliveries it caused; the owning actor hands them to the
//! broadcaster. Nothing here touches the network or the store.

use tracing::{debug, info, warn};

use crate::ws::protocol::{
    ArtifactSeed, BlockRef, ClientMsg, MoveBlock, NewMessage, OpacityUpdate, PlayerInfo,
    PositionUpdate, ServerMsg, StartDrag, UserInput,
};

use super::artifacts;
use super::block::{Block, BlockStore};
use super::decay::{DecayEvent, DecayPolicy};
use super::ownership;
use super::physics::PhysicsWorld;
use super::snapshot::SnapshotBuilder;
use super::{BlockId, ConnectionId, PhysicsMode, Player, RoomError, RoomId, RoomSettings};

/// Where a message must be delivered
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Every connection joined to the room
    Room(ServerMsg),
    /// Every connection in the room except the originator
    RoomExcept(ConnectionId, ServerMsg),
    /// A single connection
    One(ConnectionId, ServerMsg),
}

impl Outbound {
    pub fn msg(&self) -> &ServerMsg {
        match self {
            Self::Room(msg) | Self::RoomExcept(_, msg) | Self::One(_, msg) => msg,
        }
    }
}

/// What a joiner needs to reconstruct visible state
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub blocks: Vec<Block>,
    pub artifact_seed: f64,
    pub artifact_count: u32,
    pub players: Vec<PlayerInfo>,
}

pub struct RoomState {
    id: RoomId,
    settings: RoomSettings,
    /// Join order
    players: Vec<Player>,
    blocks: BlockStore,
    decay: DecayPolicy,
    artifact_seed: f64,
    artifacts_seeded: bool,
    /// Present only in server-simulated rooms
    physics: Option<PhysicsWorld>,
    snapshots: SnapshotBuilder,
    tick: u64,
}

impl RoomState {
    pub fn new(id: RoomId, settings: RoomSettings) -> Self {
        Self::with_seed(id, settings, artifacts::new_seed())
    }

    pub fn with_seed(id: RoomId, settings: RoomSettings, artifact_seed: f64) -> Self {
        let physics = match settings.physics_mode {
            PhysicsMode::Server => Some(PhysicsWorld::new(
                settings.world_width,
                settings.world_height,
                artifacts::generate(
                    artifact_seed,
                    settings.artifact_count,
                    settings.world_width,
                    settings.world_height,
                ),
            )),
            PhysicsMode::Client => None,
        };

        Self {
            id,
            decay: DecayPolicy::new(settings.decay_step),
            snapshots: SnapshotBuilder::new(settings.broadcast_interval()),
            settings,
            players: Vec::new(),
            blocks: BlockStore::new(),
            artifact_seed,
            artifacts_seeded: false,
            physics,
            tick: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn physics(&self) -> Option<&PhysicsWorld> {
        self.physics.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn player(&self, connection_id: &ConnectionId) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.connection_id == *connection_id)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            blocks: self.blocks.snapshot(),
            artifact_seed: self.artifact_seed,
            artifact_count: self.settings.artifact_count,
            players: self.player_infos(),
        }
    }

    /// Admit a player. Fails with `RoomFull` without touching any state.
    pub fn join(&mut self, player: Player) -> Result<(RoomSnapshot, Vec<Outbound>), RoomError> {
        if self.player(&player.connection_id).is_some() {
            return Err(RoomError::InvalidMessage("connection already joined".into()));
        }

        if self.players.len() >= self.settings.max_players {
            return Err(RoomError::RoomFull {
                room_id: self.id.clone(),
                capacity: self.settings.max_players,
            });
        }

        let connection_id = player.connection_id;
        info!(
            room_id = %self.id,
            connection_id = %connection_id,
            user_id = %player.user_id,
            player_count = self.players.len() + 1,
            "Player joined room"
        );
        self.players.push(player);

        let snapshot = self.snapshot();
        let outbound = vec![
            Outbound::One(connection_id, ServerMsg::LoadMessages(snapshot.blocks.clone())),
            Outbound::One(
                connection_id,
                ServerMsg::ArtifactSeed(ArtifactSeed {
                    seed: self.artifact_seed,
                    count: self.settings.artifact_count,
                    seeded: self.artifacts_seeded,
                }),
            ),
            Outbound::Room(self.player_list()),
        ];
        self.artifacts_seeded = true;

        Ok((snapshot, outbound))
    }

    /// Remove a player and tear down anything their connection was holding
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<(Player, Vec<Outbound>)> {
        let index = self
            .players
            .iter()
            .position(|p| p.connection_id == *connection_id)?;
        let player = self.players.remove(index);

        if let Some(physics) = self.physics.as_mut() {
            if let Some(handle) = physics.end_drag(connection_id) {
                debug!(
                    room_id = %self.id,
                    block_id = %handle.block_id,
                    "Released drag handle of departing connection"
                );
            }
        }

        info!(
            room_id = %self.id,
            connection_id = %connection_id,
            user_id = %player.user_id,
            player_count = self.players.len(),
            "Player left room"
        );

        Some((player, vec![Outbound::Room(self.player_list())]))
    }

    /// Apply one client event from a joined connection
    pub fn handle(
        &mut self,
        connection_id: ConnectionId,
        msg: ClientMsg,
    ) -> Result<Vec<Outbound>, RoomError> {
        let actor = self
            .player(&connection_id)
            .ok_or(RoomError::NotJoined)?
            .clone();

        match msg {
            ClientMsg::NewMessage(post) => self.post(&actor, post),
            ClientMsg::UpdatePosition(mv) => self.move_block(&actor, mv, false),
            ClientMsg::DragBlock(mv) => self.move_block(&actor, mv, true),
            ClientMsg::UserInput(input) => self.user_input(&actor, input),
            ClientMsg::StartDrag(drag) => self.start_drag(&actor, drag),
            ClientMsg::DragMove(pointer) => {
                if !pointer.x.is_finite() || !pointer.y.is_finite() {
                    return Err(RoomError::InvalidMessage("non-finite pointer".into()));
                }
                if let Some(physics) = self.physics.as_mut() {
                    physics.drag_move(&connection_id, pointer.x, pointer.y);
                }
                Ok(Vec::new())
            }
            ClientMsg::EndDrag => {
                if let Some(physics) = self.physics.as_mut() {
                    physics.end_drag(&connection_id);
                }
                Ok(Vec::new())
            }
            ClientMsg::JoinRoom(_) | ClientMsg::Ping { .. } => Err(RoomError::InvalidMessage(
                "session-level event".into(),
            )),
        }
    }

    /// Advance the simulation one fixed step
    pub fn tick(&mut self) -> Vec<Outbound> {
        let Some(physics) = self.physics.as_mut() else {
            return Vec::new();
        };

        self.tick += 1;
        let poses = physics.step(self.settings.tick_delta());
        for pose in &poses {
            self.blocks.set_pose(&pose.id, pose.x, pose.y, pose.angle);
        }

        if !self.snapshots.should_send() {
            return Vec::new();
        }

        self.snapshots
            .build(&poses)
            .into_iter()
            .map(Outbound::Room)
            .collect()
    }

    fn post(&mut self, actor: &Player, post: NewMessage) -> Result<Vec<Outbound>, RoomError> {
        if post.text.trim().is_empty() {
            return Err(RoomError::InvalidMessage("empty text".into()));
        }
        if post.text.chars().count() > self.settings.max_text_len {
            return Err(RoomError::InvalidMessage(format!(
                "text longer than {} characters",
                self.settings.max_text_len
            )));
        }
        if !post.x.is_finite() || !post.y.is_finite() {
            return Err(RoomError::InvalidMessage("non-finite position".into()));
        }

        let block = Block::new(
            self.id.clone(),
            actor.user_id.clone(),
            post.text,
            post.x,
            post.y,
            post.color1.unwrap_or_else(|| actor.color1.clone()),
            post.color2.unwrap_or_else(|| actor.color2.clone()),
        );

        let mut outbound = Vec::new();
        let events = self.decay.on_create(&block, self.blocks.owned_by(&actor.user_id));
        for event in events {
            if !self.blocks.apply_decay(&event) {
                debug!(room_id = %self.id, block_id = %event.id(), "Decay target already gone");
                continue;
            }
            match event {
                DecayEvent::OpacityChanged { id, opacity } => {
                    outbound.push(Outbound::Room(ServerMsg::UpdateOpacity(OpacityUpdate {
                        id,
                        opacity,
                    })));
                }
                DecayEvent::Evict { id } => {
                    if let Some(physics) = self.physics.as_mut() {
                        physics.remove_body(&id);
                    }
                    self.snapshots.forget(&id);
                    debug!(room_id = %self.id, block_id = %id, "Block evicted");
                    outbound.push(Outbound::Room(ServerMsg::RemoveMessage(BlockRef { id })));
                }
            }
        }

        if let Some(physics) = self.physics.as_mut() {
            physics.add_body(&block);
        }
        self.blocks.insert(block.clone());

        debug!(
            room_id = %self.id,
            block_id = %block.id,
            user_id = %block.user_id,
            block_count = self.blocks.len(),
            "Block created"
        );
        outbound.push(Outbound::Room(ServerMsg::NewMessage(block)));

        Ok(outbound)
    }

    /// Owner-submitted pose. Teleports in server rooms, relays in client rooms.
    fn move_block(
        &mut self,
        actor: &Player,
        mut mv: MoveBlock,
        dragging: bool,
    ) -> Result<Vec<Outbound>, RoomError> {
        if !mv.x.is_finite() || !mv.y.is_finite() {
            return Err(RoomError::InvalidMessage("non-finite position".into()));
        }
        let angle = self.authorize(actor, &mv.id)?.angle;

        if self.physics.is_some() {
            return Ok(self.teleport(&mv.id, mv.x, mv.y).into_iter().collect());
        }

        let angle = mv.angle.filter(|a| a.is_finite()).unwrap_or(angle);
        self.blocks.set_pose(&mv.id, mv.x, mv.y, angle);

        let relay = if dragging {
            mv.angle = Some(angle);
            mv.user_id = Some(actor.user_id.clone());
            ServerMsg::DragBlock(mv)
        } else {
            ServerMsg::UpdatePosition(PositionUpdate {
                id: mv.id,
                x: mv.x,
                y: mv.y,
                angle,
            })
        };
        Ok(vec![Outbound::RoomExcept(actor.connection_id, relay)])
    }

    fn user_input(&mut self, actor: &Player, mut input: UserInput) -> Result<Vec<Outbound>, RoomError> {
        let current_angle = self.authorize(actor, &input.message_id)?.angle;
        let id = input.message_id;

        if self.physics.is_some() {
            let mut outbound = Vec::new();
            if let (Some(x), Some(y)) = (input.x, input.y) {
                if x.is_finite() && y.is_finite() {
                    outbound.extend(self.teleport(&id, x, y));
                }
            }
            if let (Some(vx), Some(vy), Some(physics)) = (input.vx, input.vy, self.physics.as_mut()) {
                if vx.is_finite() && vy.is_finite() {
                    physics.apply_velocity(&id, vx, vy);
                }
            }
            return Ok(outbound);
        }

        if let (Some(x), Some(y)) = (input.x, input.y) {
            if x.is_finite() && y.is_finite() {
                let angle = input.angle.filter(|a| a.is_finite()).unwrap_or(current_angle);
                self.blocks.set_pose(&id, x, y, angle);
            }
        }

        input.user_id = Some(actor.user_id.clone());
        Ok(vec![Outbound::RoomExcept(
            actor.connection_id,
            ServerMsg::UserInput(input),
        )])
    }

    fn start_drag(&mut self, actor: &Player, drag: StartDrag) -> Result<Vec<Outbound>, RoomError> {
        if !drag.x.is_finite() || !drag.y.is_finite() {
            return Err(RoomError::InvalidMessage("non-finite pointer".into()));
        }
        self.authorize(actor, &drag.message_id)?;

        match self.physics.as_mut() {
            Some(physics) => {
                physics.start_drag(actor.connection_id, &drag.message_id, drag.x, drag.y);
            }
            None => debug!(room_id = %self.id, "Ignoring startDrag in client-simulated room"),
        }
        Ok(Vec::new())
    }

    /// Look up a block and apply the ownership rule
    fn authorize(&self, actor: &Player, id: &BlockId) -> Result<&Block, RoomError> {
        let block = self.blocks.get(id).ok_or(RoomError::UnknownBlock(*id))?;
        ownership::check(&actor.user_id, block)?;
        Ok(block)
    }

    /// Corrective teleport; the new pose is broadcast immediately
    fn teleport(&mut self, id: &BlockId, x: f32, y: f32) -> Option<Outbound> {
        let physics = self.physics.as_mut()?;
        if !physics.set_position(id, x, y) {
            warn!(room_id = %self.id, block_id = %id, "Block missing from physics world");
            return None;
        }

        let body = physics.body(id)?;
        let update = PositionUpdate {
            id: *id,
            x: body.x,
            y: body.y,
            angle: body.angle,
        };
        self.blocks.set_pose(id, update.x, update.y, update.angle);
        self.snapshots.forget(id);

        Some(Outbound::Room(ServerMsg::UpdatePosition(update)))
    }

    fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players
            .iter()
            .map(|p| PlayerInfo {
                user_id: p.user_id.clone(),
                color1: p.color1.clone(),
                color2: p.color2.clone(),
            })
            .collect()
    }

    fn player_list(&self) -> ServerMsg {
        ServerMsg::PlayerList(self.player_infos())
    }
}
