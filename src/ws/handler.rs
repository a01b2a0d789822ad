//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::room::{ConnectionId, Player, RoomError};
use crate::store::UserColors;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, JoinRoom, ServerMsg, Welcome};

/// Longest accepted room or user identifier
const MAX_ID_LEN: usize = 128;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome(Welcome {
        connection_id,
        server_time: unix_millis(),
    });

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send welcome");
        return;
    }

    let outbound_rx = state.broadcaster.register(connection_id);

    run_session(connection_id, &state, ws_sink, ws_stream, outbound_rx).await;

    // Cleanup on disconnect
    state.registry.leave(&connection_id).await;
    state.broadcaster.unregister(&connection_id);

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: ConnectionId,
    state: &AppState,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Spawn writer task: connection queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection_id = %connection_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => handle_client_msg(connection_id, state, client_msg).await,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(connection_id = %connection_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(connection_id = %connection_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

async fn handle_client_msg(connection_id: ConnectionId, state: &AppState, msg: ClientMsg) {
    match msg {
        ClientMsg::JoinRoom(join) => join_room(connection_id, state, join).await,
        ClientMsg::Ping { t } => {
            state.broadcaster.emit_to_one(&connection_id, ServerMsg::Pong { t });
        }
        other => {
            let event = event_label(&other);
            if let Err(e) = state.registry.dispatch(connection_id, other).await {
                debug!(connection_id = %connection_id, event, error = %e, "Event not delivered");
            }
        }
    }
}

async fn join_room(connection_id: ConnectionId, state: &AppState, join: JoinRoom) {
    if !valid_id(&join.room) || !valid_id(&join.user_id) {
        warn!(connection_id = %connection_id, "Rejected join with invalid room or user id");
        return;
    }

    let colors = resolve_colors(state, &join).await;
    let player = Player {
        connection_id,
        user_id: join.user_id.clone(),
        color1: colors.color1,
        color2: colors.color2,
    };

    match state.registry.join(&join.room, player).await {
        Ok(snapshot) => {
            info!(
                connection_id = %connection_id,
                room_id = %join.room,
                user_id = %join.user_id,
                blocks = snapshot.blocks.len(),
                players = snapshot.players.len(),
                "Joined room"
            );
        }
        Err(e @ RoomError::RoomFull { .. }) => {
            state
                .broadcaster
                .emit_to_one(&connection_id, ServerMsg::RoomError(e.to_string()));
        }
        Err(e) => {
            error!(connection_id = %connection_id, room_id = %join.room, error = %e, "Join failed");
        }
    }
}

/// Colors offered in the join payload win when they are well-formed
async fn resolve_colors(state: &AppState, join: &JoinRoom) -> UserColors {
    if let (Some(color1), Some(color2)) = (&join.color1, &join.color2) {
        let offered = UserColors {
            color1: color1.clone(),
            color2: color2.clone(),
        };
        if offered.is_valid() {
            return offered;
        }
    }
    state.color_store.get_or_create(&join.user_id).await
}

fn valid_id(id: &str) -> bool {
    !id.trim().is_empty() && id.len() <= MAX_ID_LEN
}

fn event_label(msg: &ClientMsg) -> &'static str {
    match msg {
        ClientMsg::JoinRoom(_) => "joinRoom",
        ClientMsg::NewMessage(_) => "newMessage",
        ClientMsg::UpdatePosition(_) => "updatePosition",
        ClientMsg::DragBlock(_) => "dragBlock",
        ClientMsg::UserInput(_) => "userInput",
        ClientMsg::StartDrag(_) => "startDrag",
        ClientMsg::DragMove(_) => "dragMove",
        ClientMsg::EndDrag => "endDrag",
        ClientMsg::Ping { .. } => "ping",
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
