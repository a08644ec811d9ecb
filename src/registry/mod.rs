//! Participant registry and matchmaking
//!
//! The registry is the single source of truth for who is connected, who is
//! waiting and who is paired with whom.
//!
//! # Architecture
//!
//! ```text
//!                 Mutex<Registry>
//!       ┌────────────────────────────────────┐
//!       │ participants: Identity -> Channel  │
//!       │ available:    {Identity}           │
//!       │ pairings:     Identity <-> Identity│
//!       │ media:        Identity -> State    │
//!       └─────────────────┬──────────────────┘
//!                         │ try_send (never blocks)
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    [writer u1]     [writer u2]     [writer u3]
//! ```
//!
//! # Invariants
//!
//! - `pairings[a] == b` if and only if `pairings[b] == a`, and `a != b`
//! - no identity is both in the pool and paired
//! - every pool or pairing entry belongs to a connected identity
//!
//! [`Registry::verify_invariants`] checks all three.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{ChannelHandle, Outbound, ParticipantEntry, Presence, RegistryStats};
pub use error::RegistryError;
pub use store::{PairingOutcome, Registration, Registry};
