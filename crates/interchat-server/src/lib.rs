//! # interchat-server
//!
//! HTTP listener for the chat service.
//!
//! - `GET /room`: WebSocket upgrade; each connection becomes a room session
//! - `GET /health`: uptime and member count
//! - `GET /metrics`: Prometheus exposition
//!
//! [`config`] turns loaded settings into the options the room, log and
//! sessions are built from.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use config::{ServerConfig, start_room};
pub use server::ChatServer;
pub use shutdown::ShutdownCoordinator;
