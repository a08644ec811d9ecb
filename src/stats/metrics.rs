//! Statistics for the relay server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::registry::RegistryStats;
use crate::relay::{Dispatch, DropReason};

/// Server-wide counters
///
/// Updated lock-free from connection tasks and the relay service.
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    connections_active: AtomicU64,
    frames_received: AtomicU64,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
    malformed_frames: AtomicU64,
    unrecognized_frames: AtomicU64,
    pairs_formed: AtomicU64,
    pairs_active: AtomicU64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            unrecognized_frames: AtomicU64::new(0),
            pairs_formed: AtomicU64::new(0),
            pairs_active: AtomicU64::new(0),
        }
    }

    /// A participant authenticated and registered
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A registered participant's connection ended
    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// A connection was refused (limit reached or authentication failed)
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for one dispatched frame
    pub fn record(&self, dispatch: &Dispatch) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        match dispatch {
            Dispatch::Relayed { .. }
            | Dispatch::MediaUpdated {
                forwarded: true, ..
            } => {
                self.frames_relayed.fetch_add(1, Ordering::Relaxed);
            }
            Dispatch::Dropped(reason) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                match reason {
                    DropReason::Malformed => {
                        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::Unrecognized(_) => {
                        self.unrecognized_frames.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Mirror the registry's pairing counters
    pub fn observe_registry(&self, registry: &RegistryStats) {
        self.pairs_formed
            .fetch_max(registry.pairs_formed, Ordering::Relaxed);
        self.pairs_active
            .store(registry.pairs as u64, Ordering::Relaxed);
    }

    /// Time since the counters were created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unrecognized_frames: self.unrecognized_frames.load(Ordering::Relaxed),
            pairs_formed: self.pairs_formed.load(Ordering::Relaxed),
            pairs_active: self.pairs_active.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`RelayStats`] at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub malformed_frames: u64,
    pub unrecognized_frames: u64,
    pub pairs_formed: u64,
    pub pairs_active: u64,
}
