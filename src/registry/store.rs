//! Participant registry implementation
//!
//! Holds the four pieces of per-identity state: the live channel, the
//! availability pool, the pairing table and the media-state store. Every
//! method is synchronous; callers serialize access (see
//! [`RelayService`](crate::relay::RelayService)) so each operation runs to
//! completion without interleaving.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::protocol::{Identity, MediaState, MediaStateUpdate, ServerFrame};

use super::entry::{ChannelHandle, ParticipantEntry, Presence, RegistryStats};
use super::error::RegistryError;

/// Result of registering a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Identity was not connected
    New,
    /// Identity was connected; the previous connection was told to close
    Replaced {
        /// Connection id of the replaced channel
        previous_connection_id: u64,
    },
}

/// Result of asking to be paired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Paired with the given partner; both sides were sent `match`
    Matched(Identity),
    /// No candidate; placed in the pool
    Waiting,
    /// Already paired with the given partner, nothing changed
    AlreadyPaired(Identity),
    /// Identity is not connected
    NotRegistered,
}

/// Connection registry, availability pool, pairing table and media states
#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<Identity, ParticipantEntry>,
    available: HashSet<Identity>,
    pairings: HashMap<Identity, Identity>,
    media: HashMap<Identity, MediaState>,
    pairs_formed: u64,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel to an identity
    ///
    /// A second registration of a connected identity replaces the first:
    /// the old pairing is torn down (the partner gets `leave` and goes back
    /// to the pool), media state is reset and the old channel is asked to
    /// close. Pairing the identity is a separate step
    /// ([`add_available`](Self::add_available)).
    pub fn register(
        &mut self,
        identity: Identity,
        channel: ChannelHandle,
    ) -> Result<Registration, RegistryError> {
        if identity.is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }

        let registration = match self.participants.remove(&identity) {
            Some(previous) => {
                self.available.remove(&identity);
                if let Some(partner) = self.take_pairing(&identity) {
                    self.notify_leave(&partner, &identity);
                    self.add_available(&partner);
                }
                previous.channel.close();

                tracing::warn!(
                    identity = %identity,
                    previous_connection = previous.channel.connection_id(),
                    connection_id = channel.connection_id(),
                    "Identity re-registered, closing previous channel"
                );
                Registration::Replaced {
                    previous_connection_id: previous.channel.connection_id(),
                }
            }
            None => {
                tracing::info!(
                    identity = %identity,
                    connection_id = channel.connection_id(),
                    "Participant registered"
                );
                Registration::New
            }
        };

        self.media.insert(identity.clone(), MediaState::default());
        self.participants
            .insert(identity, ParticipantEntry::new(channel));

        Ok(registration)
    }

    /// Remove an identity and everything held for it
    ///
    /// Only the connection that is currently registered may unregister; a
    /// stale connection id is ignored. A paired partner receives `leave` and
    /// is returned to the pool before the identity is removed.
    pub fn unregister(&mut self, identity: &Identity, connection_id: u64) -> bool {
        match self.participants.get(identity) {
            Some(entry) if entry.channel.connection_id() == connection_id => {}
            Some(entry) => {
                tracing::debug!(
                    identity = %identity,
                    expected = entry.channel.connection_id(),
                    actual = connection_id,
                    "Unregister from replaced connection ignored"
                );
                return false;
            }
            None => return false,
        }

        self.available.remove(identity);
        if let Some(partner) = self.take_pairing(identity) {
            self.notify_leave(&partner, identity);
            self.add_available(&partner);
        }
        self.media.remove(identity);
        let registered_secs = self
            .participants
            .remove(identity)
            .map(|entry| entry.registered_at.elapsed().as_secs())
            .unwrap_or_default();

        tracing::info!(
            identity = %identity,
            connection_id = connection_id,
            registered_secs = registered_secs,
            "Participant unregistered"
        );
        true
    }

    /// Channel currently bound to an identity
    pub fn lookup(&self, identity: &Identity) -> Option<&ChannelHandle> {
        self.participants.get(identity).map(|entry| &entry.channel)
    }

    /// Whether `connection_id` is the registered connection for `identity`
    pub fn is_current(&self, identity: &Identity, connection_id: u64) -> bool {
        self.lookup(identity)
            .is_some_and(|channel| channel.connection_id() == connection_id)
    }

    /// Pair an identity with any waiting participant, or make it wait
    ///
    /// Candidate selection order is unspecified. Candidates whose channel
    /// has already closed are skipped.
    pub fn add_available(&mut self, identity: &Identity) -> PairingOutcome {
        if !self.participants.contains_key(identity) {
            return PairingOutcome::NotRegistered;
        }
        if let Some(partner) = self.pairings.get(identity) {
            return PairingOutcome::AlreadyPaired(partner.clone());
        }

        let candidate = self
            .available
            .iter()
            .find(|candidate| *candidate != identity && self.is_reachable(candidate))
            .cloned();

        let Some(partner) = candidate else {
            self.available.insert(identity.clone());
            tracing::debug!(identity = %identity, "Participant waiting for a partner");
            return PairingOutcome::Waiting;
        };

        self.available.remove(&partner);
        self.available.remove(identity);
        self.pairings.insert(identity.clone(), partner.clone());
        self.pairings.insert(partner.clone(), identity.clone());
        self.pairs_formed += 1;

        self.notify_match(identity, &partner);
        self.notify_match(&partner, identity);

        tracing::info!(a = %identity, b = %partner, "Participants paired");
        PairingOutcome::Matched(partner)
    }

    /// Tear down the sender's pairing and look for a new partner
    ///
    /// The ex-partner receives `leave` and re-enters the pool first, so with
    /// no one else waiting the two are paired again.
    pub fn next(&mut self, identity: &Identity) -> PairingOutcome {
        if let Some(partner) = self.take_pairing(identity) {
            self.notify_leave(&partner, identity);
            self.add_available(&partner);
        }
        self.add_available(identity)
    }

    /// End the sender's pairing without re-queueing the sender
    ///
    /// Returns the ex-partner, or `None` if the sender was not paired.
    pub fn leave(&mut self, identity: &Identity) -> Option<Identity> {
        let partner = self.take_pairing(identity)?;
        self.notify_leave(&partner, identity);
        self.add_available(&partner);
        self.media.insert(identity.clone(), MediaState::default());

        tracing::info!(identity = %identity, partner = %partner, "Participant left pairing");
        Some(partner)
    }

    /// Merge a partial media state into the identity's stored state
    ///
    /// Returns the resulting state, or `None` if the identity is not
    /// connected.
    pub fn update_media_state(
        &mut self,
        identity: &Identity,
        update: &MediaStateUpdate,
    ) -> Option<MediaState> {
        if !self.participants.contains_key(identity) {
            return None;
        }
        let state = self.media.entry(identity.clone()).or_default();
        state.apply(update);
        Some(*state)
    }

    /// Stored media state of an identity
    pub fn media_state(&self, identity: &Identity) -> Option<MediaState> {
        if !self.participants.contains_key(identity) {
            return None;
        }
        Some(self.media.get(identity).copied().unwrap_or_default())
    }

    /// Current partner of an identity
    pub fn partner_of(&self, identity: &Identity) -> Option<&Identity> {
        self.pairings.get(identity)
    }

    /// Where a connected identity currently stands
    pub fn presence(&self, identity: &Identity) -> Option<Presence> {
        if !self.participants.contains_key(identity) {
            return None;
        }
        Some(match self.pairings.get(identity) {
            Some(partner) => Presence::Paired(partner.clone()),
            None if self.available.contains(identity) => Presence::Waiting,
            None => Presence::Idle,
        })
    }

    /// Connected identities, sorted
    pub fn connected_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.participants.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Identities waiting in the pool, sorted
    pub fn available_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.available.iter().cloned().collect();
        identities.sort();
        identities
    }

    /// Both directed entries of every active pairing
    pub fn pairings(&self) -> BTreeMap<Identity, Identity> {
        self.pairings
            .iter()
            .map(|(a, b)| (a.clone(), b.clone()))
            .collect()
    }

    /// Current counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connected: self.participants.len(),
            available: self.available.len(),
            pairs: self.pairings.len() / 2,
            pairs_formed: self.pairs_formed,
        }
    }

    /// Total pairs formed since creation
    pub fn pairs_formed(&self) -> u64 {
        self.pairs_formed
    }

    /// Drop all state and ask every channel to close
    ///
    /// Returns the number of participants removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.participants.len();
        for entry in self.participants.values() {
            entry.channel.close();
        }
        self.participants.clear();
        self.available.clear();
        self.pairings.clear();
        self.media.clear();
        removed
    }

    /// Check the pool/pairing invariants
    pub fn verify_invariants(&self) -> Result<(), RegistryError> {
        for (a, b) in &self.pairings {
            if a == b {
                return Err(RegistryError::SelfPairing(a.clone()));
            }
            if self.pairings.get(b) != Some(a) {
                return Err(RegistryError::AsymmetricPairing(a.clone(), b.clone()));
            }
            if self.available.contains(a) {
                return Err(RegistryError::AvailableWhilePaired(a.clone()));
            }
            if !self.participants.contains_key(a) {
                return Err(RegistryError::Orphaned(a.clone()));
            }
        }
        for identity in &self.available {
            if !self.participants.contains_key(identity) {
                return Err(RegistryError::Orphaned(identity.clone()));
            }
        }
        Ok(())
    }

    fn is_reachable(&self, identity: &Identity) -> bool {
        self.participants
            .get(identity)
            .is_some_and(|entry| !entry.channel.is_closed())
    }

    fn take_pairing(&mut self, identity: &Identity) -> Option<Identity> {
        let partner = self.pairings.remove(identity)?;
        self.pairings.remove(&partner);
        Some(partner)
    }

    fn notify_match(&self, to: &Identity, partner: &Identity) {
        if let Some(entry) = self.participants.get(to) {
            let media_state = self.media.get(partner).copied().unwrap_or_default();
            entry.channel.send_frame(ServerFrame::Match {
                partner: partner.clone(),
                media_state,
            });
        }
    }

    fn notify_leave(&self, to: &Identity, departed: &Identity) {
        if let Some(entry) = self.participants.get(to) {
            entry.channel.send_frame(ServerFrame::Leave {
                user: departed.clone(),
            });
        }
    }
}
