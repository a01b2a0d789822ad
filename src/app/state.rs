//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::room::RoomRegistry;
use crate::store::{BlockArchive, ColorStore, StoreClient};
use crate::ws::broadcast::SyncBroadcaster;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broadcaster: Arc<SyncBroadcaster>,
    pub registry: Arc<RoomRegistry>,
    pub color_store: ColorStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Persistence is optional; without it colors live in memory and blocks are not archived
        let store = match (&config.store_url, &config.store_service_key) {
            (Some(url), Some(key)) => Some(StoreClient::new(url, key)),
            _ => None,
        };
        let color_store = ColorStore::new(store.clone());
        let archive = BlockArchive::new(store);
        info!(archive = archive.is_enabled(), "Persistent store configured");

        // Rooms and sockets share one broadcaster
        let broadcaster = Arc::new(SyncBroadcaster::new());
        let registry = Arc::new(RoomRegistry::new(
            config.room.clone(),
            broadcaster.clone(),
            archive,
        ));

        Self {
            config,
            broadcaster,
            registry,
            color_store,
        }
    }
}
