//! WebSocket server
//!
//! Accepts TCP connections, upgrades them to WebSocket, authenticates the
//! caller and hands each connection to the relay service.

pub mod auth;
pub mod config;
pub mod connection;
pub mod listener;

pub use auth::{Authenticator, HandshakeRequest, TokenAuthenticator};
pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RelayServer;
