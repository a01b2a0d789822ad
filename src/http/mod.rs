//! HTTP surface: health, user colors, room inspection and the WebSocket upgrade

pub mod routes;

pub use routes::build_router;
