//! Registry error types

use crate::protocol::Identity;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Identity string is empty
    #[error("identity must not be empty")]
    EmptyIdentity,
    /// Pairing table entry without its mirror
    #[error("pairing {0} -> {1} has no reverse entry")]
    AsymmetricPairing(Identity, Identity),
    /// Participant paired with itself
    #[error("participant paired with itself: {0}")]
    SelfPairing(Identity),
    /// Participant both in the pool and paired
    #[error("participant both available and paired: {0}")]
    AvailableWhilePaired(Identity),
    /// Pool or pairing entry for an identity that is not connected
    #[error("state held for unregistered participant: {0}")]
    Orphaned(Identity),
}
