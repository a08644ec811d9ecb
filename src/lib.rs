//! Matchmaking and signaling relay for anonymous peer-to-peer sessions
//!
//! Participants connect over WebSocket, are authenticated by an external
//! [`Authenticator`](server::Authenticator), and are paired two by two. Once
//! paired, the relay forwards their signaling frames (`offer`, `answer`,
//! `candidate`), chat messages and media toggle updates to each other. The
//! media itself flows directly between the peers.
//!
//! # Example
//!
//! ```no_run
//! use pairing_relay::{RelayServer, ServerConfig, TokenAuthenticator};
//!
//! # async fn run() -> pairing_relay::Result<()> {
//! let auth = TokenAuthenticator::new()
//!     .with_token("secret-1", "alice")
//!     .with_token("secret-2", "bob");
//!
//! let server = RelayServer::new(ServerConfig::default(), auth);
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await
//! # }
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: frame codec and identity/media types
//! - [`registry`]: connection registry, pool, pairing table, media states
//! - [`relay`]: frame dispatch and the shared [`RelayService`]
//! - [`server`]: WebSocket listener, connection handler, authentication
//! - [`session`]: per-connection lifecycle
//! - [`stats`]: counters
//! - [`admin`]: serializable admin reports

pub mod admin;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use protocol::{Identity, MediaState};
pub use relay::RelayService;
pub use server::{Authenticator, HandshakeRequest, RelayServer, ServerConfig, TokenAuthenticator};
