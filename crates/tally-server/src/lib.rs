//! # tally-server
//!
//! Transports and RPC dispatch in front of the Tally broker.
//!
//! - HTTP endpoints: `/ws` upgrade, `/health`, `/metrics`
//! - `WebSocket` gateway: connection tracking, heartbeat, per-socket session loop
//! - stdio transport: one channel over newline-delimited JSON
//! - RPC method registry and handlers shared by every transport
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod stdio;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TallyServer;
pub use session::{ChannelSession, SessionFactory};
pub use shutdown::ShutdownCoordinator;
pub use stdio::{StdioConfig, run_stdio};
