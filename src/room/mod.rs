//! Room synchronization core

pub mod actor;
pub mod artifacts;
pub mod block;
pub mod decay;
pub mod ownership;
pub mod physics;
pub mod registry;
pub mod snapshot;
pub mod state;

pub use block::Block;
pub use registry::RoomRegistry;
pub use state::{Outbound, RoomSnapshot};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Caller-supplied room identifier
pub type RoomId = String;
/// Stable, client-asserted user identity
pub type UserId = String;
/// One live transport session
pub type ConnectionId = Uuid;
/// Server-generated block identifier
pub type BlockId = Uuid;

/// Who simulates block motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsMode {
    /// The server steps one world per room and is the sole writer of positions
    Server,
    /// Clients simulate locally; the server relays owner-submitted motion
    Client,
}

impl FromStr for PhysicsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            other => Err(format!("unknown physics mode: {other}")),
        }
    }
}

impl fmt::Display for PhysicsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Tuning shared by every room
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_players: usize,
    pub decay_step: u8,
    pub max_text_len: usize,
    pub tick_rate: u32,
    pub broadcast_rate: u32,
    pub artifact_count: u32,
    pub world_width: f32,
    pub world_height: f32,
    pub physics_mode: PhysicsMode,
}

impl RoomSettings {
    /// Fixed simulation step in seconds
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Number of ticks between position broadcasts
    pub fn broadcast_interval(&self) -> u32 {
        (self.tick_rate / self.broadcast_rate.max(1)).max(1)
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: 4,
            decay_step: 10,
            max_text_len: 500,
            tick_rate: 60,
            broadcast_rate: 30,
            artifact_count: 3,
            world_width: 1280.0,
            world_height: 720.0,
            physics_mode: PhysicsMode::Server,
        }
    }
}

/// A participant bound to one live connection
#[derive(Debug, Clone)]
pub struct Player {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub color1: String,
    pub color2: String,
}

/// Commands processed run-to-completion by a room actor
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        player: Player,
        reply: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },
    Leave {
        connection_id: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    Client {
        connection_id: ConnectionId,
        msg: ClientMsg,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Room-level failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    #[error("Room {room_id} is full (max {capacity} players)")]
    RoomFull { room_id: RoomId, capacity: usize },

    #[error("User {actor} may not mutate block {block_id}")]
    OwnershipViolation { actor: UserId, block_id: BlockId },

    #[error("Unknown block: {0}")]
    UnknownBlock(BlockId),

    #[error("Connection has not joined a room")]
    NotJoined,

    #[error("Room was closed")]
    RoomClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}
