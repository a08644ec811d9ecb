//! Channel handles and per-participant entries
//!
//! A [`ChannelHandle`] is the registry's side of a live connection: a
//! bounded queue drained by the connection's writer. Sending never blocks;
//! a full or closed queue drops the message. Closing is signalled out of
//! band through a [`CancellationToken`], so a full queue cannot swallow it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Identity, ServerFrame};

/// Message queued for delivery on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Server-synthesized frame
    Frame(ServerFrame),
    /// Client frame relayed from the partner
    Relay(Arc<str>),
    /// Close the connection (best effort; see [`ChannelHandle::close`])
    Close,
}

/// Sending half of a participant's channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    connection_id: u64,
    tx: mpsc::Sender<Outbound>,
    close: CancellationToken,
}

impl ChannelHandle {
    /// Create a channel with the given queue capacity
    ///
    /// Returns the handle and the receiver the connection writer drains.
    pub fn channel(connection_id: u64, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            connection_id,
            tx,
            close: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Process-unique id of the underlying connection
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a message without waiting
    ///
    /// Returns false if the message was dropped.
    pub fn send(&self, message: Outbound) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = self.connection_id,
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    "Channel closed, dropping frame"
                );
                false
            }
        }
    }

    /// Queue a server frame
    pub fn send_frame(&self, frame: ServerFrame) -> bool {
        self.send(Outbound::Frame(frame))
    }

    /// Ask the connection to close
    ///
    /// The token is always cancelled. An [`Outbound::Close`] is also queued
    /// when there is room, so a writer draining the queue stops in order.
    pub fn close(&self) {
        self.close.cancel();
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Whether [`close`](Self::close) has been called on any clone
    pub fn is_close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Token cancelled when the connection is asked to close
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

/// Registry entry for one connected participant
#[derive(Debug)]
pub struct ParticipantEntry {
    /// Channel bound to the participant
    pub channel: ChannelHandle,
    /// When the participant registered
    pub registered_at: Instant,
}

impl ParticipantEntry {
    pub(super) fn new(channel: ChannelHandle) -> Self {
        Self {
            channel,
            registered_at: Instant::now(),
        }
    }
}

/// Where a registered participant currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// In the availability pool
    Waiting,
    /// Paired with the given partner
    Paired(Identity),
    /// Left its last pairing and has not asked for a new one
    Idle,
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered participants
    pub connected: usize,
    /// Participants waiting in the pool
    pub available: usize,
    /// Active pairs
    pub pairs: usize,
    /// Pairs formed since the registry was created
    pub pairs_formed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers() {
        let (handle, mut rx) = ChannelHandle::channel(7, 4);
        assert_eq!(handle.connection_id(), 7);

        assert!(handle.send(Outbound::Relay(Arc::from("{}"))));
        assert_eq!(rx.recv().await, Some(Outbound::Relay(Arc::from("{}"))));
    }

    #[test]
    fn test_send_drops_when_full() {
        let (handle, _rx) = ChannelHandle::channel(1, 1);

        assert!(handle.send(Outbound::Close));
        assert!(!handle.send(Outbound::Close));
    }

    #[test]
    fn test_close_signalled_when_queue_full() {
        let (handle, mut rx) = ChannelHandle::channel(3, 1);
        let writer_side = handle.clone();
        assert!(handle.send(Outbound::Relay(Arc::from("{}"))));

        handle.close();

        assert!(writer_side.is_close_requested());
        assert!(writer_side.close_token().is_cancelled());
        assert_eq!(rx.try_recv().ok(), Some(Outbound::Relay(Arc::from("{}"))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_drops_when_closed() {
        let (handle, rx) = ChannelHandle::channel(1, 4);
        drop(rx);

        assert!(handle.is_closed());
        assert!(!handle.send(Outbound::Close));
    }
}
