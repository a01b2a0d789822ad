//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::room::{Block, PhysicsMode};
use crate::store::UserColors;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::PlayerInfo;

/// Upper bound on a plain HTTP request; upgraded sockets are not affected
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/user/:user_id", get(get_colors_handler).post(set_colors_handler))
        .route("/api/rooms/:room_id", get(room_handler));

    router
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origins))
        .with_state(state)
}

/// CORS from the configured allow-list; an empty list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<header::HeaderValue> = origins
        .iter()
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
    connections: usize,
    physics_mode: PhysicsMode,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.registry.active_rooms(),
        active_players: state.registry.total_players(),
        connections: state.broadcaster.connection_count(),
        physics_mode: state.config.room.physics_mode,
    })
}

// ============================================================================
// User color endpoints
// ============================================================================

#[derive(Deserialize)]
struct ColorsRequest {
    color1: String,
    color2: String,
}

async fn get_colors_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserColors>, AppError> {
    validate_user_id(&user_id)?;
    Ok(Json(state.color_store.get_or_create(&user_id).await))
}

async fn set_colors_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<ColorsRequest>,
) -> Result<Json<UserColors>, AppError> {
    validate_user_id(&user_id)?;

    let colors = UserColors {
        color1: req.color1,
        color2: req.color2,
    };
    if !colors.is_valid() {
        return Err(AppError::BadRequest(
            "Colors must be hex values like #abc or #aabbcc".to_string(),
        ));
    }

    state.color_store.update(&user_id, colors.clone()).await;
    Ok(Json(colors))
}

fn validate_user_id(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("User id must not be empty".to_string()));
    }
    Ok(())
}

// ============================================================================
// Room inspection
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomResponse {
    room_id: String,
    players: Vec<PlayerInfo>,
    blocks: Vec<Block>,
    artifact_seed: f64,
    artifact_count: u32,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    let snapshot = state
        .registry
        .snapshot(&room_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Room {} is not active", room_id)))?;

    Ok(Json(RoomResponse {
        room_id: snapshot.room_id,
        players: snapshot.players,
        blocks: snapshot.blocks,
        artifact_seed: snapshot.artifact_seed,
        artifact_count: snapshot.artifact_count,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::room::RoomSettings;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".into(),
            store_url: None,
            store_service_key: None,
            client_origins: Vec::new(),
            room: RoomSettings {
                physics_mode: PhysicsMode::Client,
                ..RoomSettings::default()
            },
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_empty_server() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeRooms"], 0);
        assert_eq!(body["physicsMode"], "client");
    }

    #[tokio::test]
    async fn test_colors_get_or_create_then_update() {
        let state = test_state();

        let response = build_router(state.clone())
            .oneshot(Request::get("/api/user/u1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(crate::store::colors::is_hex_color(body["color1"].as_str().unwrap()));

        let update = Request::post("/api/user/u1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r##"{"color1":"#112233","color2":"#abc"}"##))
            .unwrap();
        let response = build_router(state.clone()).oneshot(update).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.color_store.get_or_create("u1").await.color1, "#112233");
    }

    #[tokio::test]
    async fn test_colors_reject_non_hex() {
        let request = Request::post("/api/user/u1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r##"{"color1":"red","color2":"#abc"}"##))
            .unwrap();
        let response = build_router(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_inactive_room_is_not_found() {
        let response = build_router(test_state())
            .oneshot(Request::get("/api/rooms/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
