//! Session state machine
//!
//! Tracks one connection from accept to close:
//!
//! ```text
//! Connecting ──auth ok──► Registered ──close/error──► Closed
//!      │                                                 ▲
//!      └──────────────auth failed / timeout──────────────┘
//! ```
//!
//! Waiting vs. paired is registry state, see
//! [`Presence`](crate::registry::Presence).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::Identity;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport accepted, identity not yet established
    Connecting,
    /// Identity bound and registered with the relay
    Registered,
    /// Terminal
    Closed,
}

/// Per-connection state
#[derive(Debug)]
pub struct SessionState {
    /// Process-unique connection id
    pub connection_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Identity, once registered
    pub identity: Option<Identity>,

    /// Connection start time
    pub connected_at: Instant,

    /// Time when registration completed
    pub registered_at: Option<Instant>,

    /// Text frames received from the client
    pub frames_received: u64,

    /// Frames written to the client
    pub frames_sent: u64,
}

impl SessionState {
    /// Create a new session state
    pub fn new(connection_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            connection_id,
            peer_addr,
            phase: SessionPhase::Connecting,
            identity: None,
            connected_at: Instant::now(),
            registered_at: None,
            frames_received: 0,
            frames_sent: 0,
        }
    }

    /// Bind the authenticated identity
    ///
    /// Only valid from `Connecting`; returns false otherwise.
    pub fn register(&mut self, identity: Identity) -> bool {
        if self.phase != SessionPhase::Connecting {
            return false;
        }
        self.identity = Some(identity);
        self.phase = SessionPhase::Registered;
        self.registered_at = Some(Instant::now());
        true
    }

    /// Move to `Closed`
    ///
    /// Returns the identity whose registry state must be torn down. This is
    /// `Some` exactly once, on the first close of a registered session.
    pub fn close(&mut self) -> Option<Identity> {
        let previous = std::mem::replace(&mut self.phase, SessionPhase::Closed);
        match previous {
            SessionPhase::Registered => self.identity.clone(),
            SessionPhase::Connecting | SessionPhase::Closed => None,
        }
    }

    /// Check if the session is registered
    pub fn is_registered(&self) -> bool {
        self.phase == SessionPhase::Registered
    }

    /// Check if the session is closed
    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
