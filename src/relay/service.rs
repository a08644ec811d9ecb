//! Relay service
//!
//! Owns the [`Registry`] behind a single exclusive lock. Every mutation
//! (registration, pairing, teardown, frame dispatch) takes the lock, runs
//! synchronously to completion and releases it; nothing awaits while the
//! lock is held.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::admin::{ClearReport, ClientsReport, PairingsReport};
use crate::error::{Error, Result};
use crate::protocol::{Identity, InboundFrame, MediaState};
use crate::registry::{
    ChannelHandle, Outbound, PairingOutcome, Presence, Registry, RegistryError, RegistryStats,
};
use crate::stats::RelayStats;

use super::engine::{self, Dispatch, DropReason};

/// Default per-channel outbound queue capacity
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Matchmaking and relay service
///
/// Constructed by the process entry point and shared with connection
/// handlers through an `Arc`. Independent instances share nothing.
pub struct RelayService {
    registry: Mutex<Registry>,
    stats: Arc<RelayStats>,
    next_connection_id: AtomicU64,
    outbound_capacity: usize,
    shutting_down: AtomicBool,
}

impl RelayService {
    /// Create a service with the default outbound queue capacity
    pub fn new() -> Self {
        Self::with_outbound_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Create a service whose channels queue at most `capacity` frames
    pub fn with_outbound_capacity(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            stats: Arc::new(RelayStats::new()),
            next_connection_id: AtomicU64::new(1),
            outbound_capacity: capacity.max(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Server-wide counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Allocate a channel for a new connection
    pub fn open_channel(&self) -> (ChannelHandle, mpsc::Receiver<Outbound>) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        ChannelHandle::channel(connection_id, self.outbound_capacity)
    }

    /// Register an authenticated channel and try to pair it
    pub async fn connect(&self, identity: Identity, channel: ChannelHandle) -> Result<PairingOutcome> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let mut registry = self.registry.lock().await;
        // shutdown may have cleared the registry while we waited
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        registry.register(identity.clone(), channel)?;
        let outcome = registry.add_available(&identity);
        self.stats.observe_registry(&registry.stats());
        Ok(outcome)
    }

    /// Decode and dispatch one text message from `sender`
    ///
    /// Malformed text is logged and dropped; the connection stays open.
    pub async fn handle_text(&self, sender: &Identity, connection_id: u64, text: &str) -> Dispatch {
        match InboundFrame::decode(text) {
            Ok(frame) => self.handle_frame(sender, connection_id, &frame).await,
            Err(e) => {
                tracing::warn!(identity = %sender, error = %e, "Dropping malformed frame");
                let dispatch = Dispatch::Dropped(DropReason::Malformed);
                self.stats.record(&dispatch);
                dispatch
            }
        }
    }

    /// Dispatch one decoded frame from `sender`
    pub async fn handle_frame(
        &self,
        sender: &Identity,
        connection_id: u64,
        frame: &InboundFrame,
    ) -> Dispatch {
        let dispatch = {
            let mut registry = self.registry.lock().await;
            let dispatch = engine::dispatch(&mut registry, sender, connection_id, frame);
            self.stats.observe_registry(&registry.stats());
            dispatch
        };

        tracing::trace!(
            identity = %sender,
            frame_type = frame.kind.name(),
            outcome = ?dispatch,
            "Frame dispatched"
        );
        self.stats.record(&dispatch);
        dispatch
    }

    /// Tear down everything held for a closed connection
    ///
    /// Returns false if the connection was not (or no longer) registered.
    pub async fn disconnect(&self, identity: &Identity, connection_id: u64) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = registry.unregister(identity, connection_id);
        self.stats.observe_registry(&registry.stats());
        removed
    }

    /// Where a connected identity currently stands
    pub async fn presence(&self, identity: &Identity) -> Option<Presence> {
        self.registry.lock().await.presence(identity)
    }

    /// Stored media state of a connected identity
    pub async fn media_state(&self, identity: &Identity) -> Option<MediaState> {
        self.registry.lock().await.media_state(identity)
    }

    /// Registry counters
    pub async fn registry_stats(&self) -> RegistryStats {
        self.registry.lock().await.stats()
    }

    /// Connected identities, sorted
    pub async fn connected_identities(&self) -> Vec<Identity> {
        self.registry.lock().await.connected_identities()
    }

    /// Identities waiting in the pool, sorted
    pub async fn available_identities(&self) -> Vec<Identity> {
        self.registry.lock().await.available_identities()
    }

    /// Both directed entries of every active pairing
    pub async fn pairings(&self) -> BTreeMap<Identity, Identity> {
        self.registry.lock().await.pairings()
    }

    /// Check the registry invariants
    pub async fn verify_invariants(&self) -> std::result::Result<(), RegistryError> {
        self.registry.lock().await.verify_invariants()
    }

    /// Admin view of connected identities
    pub async fn clients_report(&self) -> ClientsReport {
        ClientsReport::new(self.connected_identities().await)
    }

    /// Admin view of active pairings
    pub async fn pairings_report(&self) -> PairingsReport {
        PairingsReport::new(self.pairings().await)
    }

    /// Drop all participants, pairings and media states
    ///
    /// Every connected channel is asked to close.
    pub async fn clear(&self) -> ClearReport {
        let removed = {
            let mut registry = self.registry.lock().await;
            let removed = registry.clear();
            self.stats.observe_registry(&registry.stats());
            removed
        };
        tracing::info!(removed = removed, "All clients and pairings cleared");
        ClearReport::new(removed)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new registrations and close every channel
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = {
            let mut registry = self.registry.lock().await;
            let removed = registry.clear();
            self.stats.observe_registry(&registry.stats());
            removed
        };
        tracing::info!(closed = removed, "Relay service shut down");
    }
}

impl Default for RelayService {
    fn default() -> Self {
        Self::new()
    }
}
