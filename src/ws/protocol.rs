//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::room::{Block, BlockId, ConnectionId, RoomId, UserId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Enter a room, creating it if needed
    JoinRoom(JoinRoom),

    /// Post a new block
    NewMessage(NewMessage),

    /// Owner repositions a block (corrective teleport or relayed pose)
    UpdatePosition(MoveBlock),

    /// Owner drags a block (relayed in client-simulated rooms)
    DragBlock(MoveBlock),

    /// Drag/throw input for a block
    UserInput(UserInput),

    /// Grab a block with the pointer
    StartDrag(StartDrag),

    /// Move the grabbed pointer
    DragMove(PointerMove),

    /// Release the grabbed block
    EndDrag,

    /// Latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sent once after the socket is accepted
    Welcome(Welcome),

    /// Every live block, oldest first, sent to a joiner
    LoadMessages(Vec<Block>),

    /// Input for deterministic fixture generation
    ArtifactSeed(ArtifactSeed),

    /// Current room membership
    PlayerList(Vec<PlayerInfo>),

    /// A block was created
    NewMessage(Block),

    /// A block faded
    UpdateOpacity(OpacityUpdate),

    /// A block was evicted
    RemoveMessage(BlockRef),

    /// A block's pose changed
    UpdatePosition(PositionUpdate),

    /// Relayed owner drag
    DragBlock(MoveBlock),

    /// Relayed owner input
    UserInput(UserInput),

    /// Join rejected
    RoomError(String),

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub color1: Option<String>,
    #[serde(default)]
    pub color2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Ignored; the connection's joined room is used
    #[serde(default)]
    pub room: Option<RoomId>,
    pub text: String,
    pub x: f32,
    pub y: f32,
    /// Ignored; the identity asserted on join is used
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub color1: Option<String>,
    #[serde(default)]
    pub color2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBlock {
    #[serde(alias = "messageId")]
    pub id: BlockId,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    /// Filled in by the server when relaying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    #[serde(alias = "id")]
    pub message_id: BlockId,
    /// Free-form input kind ("drag", "throw", ...), relayed untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f32>,
    /// Filled in by the server when relaying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDrag {
    #[serde(alias = "id")]
    pub message_id: BlockId,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointerMove {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
    pub server_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSeed {
    pub seed: f64,
    pub count: u32,
    /// False only for the first client to enter a fresh room
    pub seeded: bool,
}

/// Player info for membership lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub user_id: UserId,
    pub color1: String,
    pub color2: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpacityUpdate {
    pub id: BlockId,
    pub opacity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: BlockId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

impl ServerMsg {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::LoadMessages(_) => "loadMessages",
            Self::ArtifactSeed(_) => "artifactSeed",
            Self::PlayerList(_) => "playerList",
            Self::NewMessage(_) => "newMessage",
            Self::UpdateOpacity(_) => "updateOpacity",
            Self::RemoveMessage(_) => "removeMessage",
            Self::UpdatePosition(_) => "updatePosition",
            Self::DragBlock(_) => "dragBlock",
            Self::UserInput(_) => "userInput",
            Self::RoomError(_) => "roomError",
            Self::Pong { .. } => "pong",
        }
    }
}
