//! Media toggle state
//!
//! The relay keeps the last microphone/camera state each participant
//! reported so a new partner can render it right after `match`.

use serde::{Deserialize, Serialize};

/// Last known microphone/camera state of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    /// Microphone enabled
    pub microphone: bool,
    /// Camera enabled
    pub video: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            microphone: true,
            video: true,
        }
    }
}

impl MediaState {
    /// Merge a partial update into this state
    ///
    /// Fields absent from the update keep their current value.
    pub fn apply(&mut self, update: &MediaStateUpdate) {
        if let Some(microphone) = update.microphone {
            self.microphone = microphone;
        }
        if let Some(video) = update.video {
            self.video = video;
        }
    }
}

/// Partial media state carried by a `media-state-change` frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
}
