//! WebSocket transport: wire protocol, session handling and room fan-out

pub mod broadcast;
pub mod handler;
pub mod protocol;
