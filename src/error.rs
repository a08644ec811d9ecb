//! Crate-level error type

use tokio_tungstenite::tungstenite;

use crate::protocol::FrameError;
use crate::registry::RegistryError;

/// Errors surfaced by the server and the relay service
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol or handshake failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Frame could not be decoded or encoded
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Registry rejected the operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Authenticator did not supply an identity
    #[error("authentication rejected")]
    Unauthenticated,

    /// WebSocket upgrade took too long
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Authenticator did not answer in time
    #[error("authentication timed out")]
    AuthTimeout,

    /// The relay service has been shut down
    #[error("relay service is shutting down")]
    ShuttingDown,
}

/// Result alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
