//! Relay engine and service
//!
//! [`engine::dispatch`] decides what one frame does; [`RelayService`]
//! serializes those decisions over the shared registry.

pub mod engine;
pub mod service;

pub use engine::{dispatch, Dispatch, DropReason};
pub use service::{RelayService, DEFAULT_OUTBOUND_CAPACITY};
