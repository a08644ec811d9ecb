//! Wire protocol between participants and the relay
//!
//! Frames are JSON text messages carried over a WebSocket:
//!
//! ```text
//! client -> server   {"type":"offer","user":"u1","partner":"u2","sdp":{...}}
//! server -> client   {"type":"match","partner":"u2","mediaState":{"microphone":true,"video":true}}
//! server -> client   {"type":"leave","user":"u2"}
//! ```

pub mod frame;
pub mod identity;
pub mod media;

pub use frame::{FrameError, FrameKind, InboundFrame, ServerFrame};
pub use identity::Identity;
pub use media::{MediaState, MediaStateUpdate};
