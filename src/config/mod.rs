//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::room::{PhysicsMode, RoomSettings};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Persistent store base URL (PostgREST compatible)
    pub store_url: Option<String>,
    /// Service key for the persistent store
    pub store_service_key: Option<String>,

    /// Allowed client origins for CORS (empty = any origin)
    pub client_origins: Vec<String>,

    /// Per-room tuning shared by every room actor
    pub room: RoomSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for hosted deployments
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let physics_mode = match env::var("PHYSICS_MODE") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("PHYSICS_MODE"))?,
            Err(_) => PhysicsMode::Server,
        };

        let defaults = RoomSettings::default();
        let room = RoomSettings {
            max_players: parse_or("ROOM_MAX_PLAYERS", defaults.max_players)?,
            decay_step: parse_or("DECAY_STEP", defaults.decay_step)?,
            max_text_len: parse_or("MAX_TEXT_LEN", defaults.max_text_len)?,
            tick_rate: parse_or("TICK_RATE", defaults.tick_rate)?,
            broadcast_rate: parse_or("BROADCAST_RATE", defaults.broadcast_rate)?,
            artifact_count: parse_or("ARTIFACT_COUNT", defaults.artifact_count)?,
            world_width: parse_or("WORLD_WIDTH", defaults.world_width)?,
            world_height: parse_or("WORLD_HEIGHT", defaults.world_height)?,
            physics_mode,
        };

        validate_room(&room)?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            store_url: non_empty("STORE_URL"),
            store_service_key: non_empty("STORE_SERVICE_KEY"),

            client_origins: env::var("CLIENT_ORIGIN")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            room,
        })
    }

    /// Persistence is only enabled when both the URL and key are present
    pub fn store_enabled(&self) -> bool {
        self.store_url.is_some() && self.store_service_key.is_some()
    }
}

/// Reject room tuning that would stall reclamation or break world generation
fn validate_room(room: &RoomSettings) -> Result<(), ConfigError> {
    if room.max_players == 0 {
        return Err(ConfigError::Invalid("ROOM_MAX_PLAYERS"));
    }
    if room.decay_step == 0 {
        return Err(ConfigError::Invalid("DECAY_STEP"));
    }
    if room.tick_rate == 0 {
        return Err(ConfigError::Invalid("TICK_RATE"));
    }
    if room.broadcast_rate == 0 {
        return Err(ConfigError::Invalid("BROADCAST_RATE"));
    }
    if !(room.world_width.is_finite() && room.world_width > 0.0) {
        return Err(ConfigError::Invalid("WORLD_WIDTH"));
    }
    if !(room.world_height.is_finite() && room.world_height > 0.0) {
        return Err(ConfigError::Invalid("WORLD_HEIGHT"));
    }
    Ok(())
}

fn non_empty(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
