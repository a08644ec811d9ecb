//! Participant identity
//!
//! An identity is an opaque string issued by the authentication
//! collaborator. The relay never parses it; it only compares and hashes it.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create a new identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}
