//! Administrative reports
//!
//! Serializable views of relay state for an HTTP collaborator. The shapes
//! match the JSON bodies of the admin routes:
//!
//! ```text
//! GET  /clients   {"count":2,"clients":["u1","u2"]}
//! GET  /pairings  {"count":1,"pairings":{"u1":"u2","u2":"u1"}}
//! POST /clear     {"message":"All clients and pairings cleared"}
//! ```
//!
//! The relay logic itself never reads these.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::protocol::Identity;

/// Connected identities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientsReport {
    pub count: usize,
    pub clients: Vec<Identity>,
}

impl ClientsReport {
    pub fn new(clients: Vec<Identity>) -> Self {
        Self {
            count: clients.len(),
            clients,
        }
    }
}

/// Active pairings, both directions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingsReport {
    /// Number of pairs (half the number of entries)
    pub count: usize,
    pub pairings: BTreeMap<Identity, Identity>,
}

impl PairingsReport {
    pub fn new(pairings: BTreeMap<Identity, Identity>) -> Self {
        Self {
            count: pairings.len() / 2,
            pairings,
        }
    }
}

/// Result of clearing all state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub message: String,
    /// Participants whose channels were closed
    pub removed: usize,
}

impl ClearReport {
    pub fn new(removed: usize) -> Self {
        Self {
            message: "All clients and pairings cleared".to_owned(),
            removed,
        }
    }
}
