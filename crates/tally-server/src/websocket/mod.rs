//! WebSocket transport: connection tracking, heartbeat, and the per-socket
//! session loop.

pub mod connections;
pub mod heartbeat;
pub mod session;
