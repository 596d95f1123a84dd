//! Subscriber queues.
//!
//! A subscription is a bounded single-consumer queue split into two halves:
//! the [`SubscriberHandle`] that topics push into, and the [`SubscriberFeed`]
//! the consumer drains. Topics push without blocking; closing is idempotent
//! and observable from the feed side even while other topics still hold
//! handle clones.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use plexus_core::Envelope;

use crate::error::BusError;

/// Unique identifier for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    fn generate() -> Self {
        Self(format!("sub-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Factory for subscription halves.
pub struct Subscriber;

impl Subscriber {
    /// Create a subscription with a queue bounded at `capacity`.
    #[must_use]
    pub fn channel(capacity: usize) -> (SubscriberHandle, SubscriberFeed) {
        let id = SubscriberId::generate();
        let (tx, rx) = mpsc::channel(capacity);
        let token = CancellationToken::new();
        (
            SubscriberHandle {
                id: id.clone(),
                tx,
                token: token.clone(),
            },
            SubscriberFeed { id, rx, token },
        )
    }
}

/// The push side of a subscription, held by topics. Clones share the same
/// queue, so one feed can be attached to many topics.
#[derive(Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    tx: mpsc::Sender<Envelope>,
    token: CancellationToken,
}

impl SubscriberHandle {
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Non-blocking push.
    ///
    /// # Errors
    ///
    /// [`BusError::QueueFull`] when the consumer is not keeping up, or
    /// [`BusError::SubscriberClosed`] when the queue has been closed.
    pub fn push(&self, envelope: Envelope) -> Result<(), BusError> {
        if self.token.is_cancelled() {
            return Err(BusError::SubscriberClosed);
        }
        self.tx.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => BusError::QueueFull,
            TrySendError::Closed(_) => BusError::SubscriberClosed,
        })
    }

    /// Close the queue. Idempotent: the feed observes exactly one closure no
    /// matter how many topics call this.
    pub fn close(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The consumer side of a subscription.
pub struct SubscriberFeed {
    id: SubscriberId,
    rx: mpsc::Receiver<Envelope>,
    token: CancellationToken,
}

impl SubscriberFeed {
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Take an already-queued envelope without waiting.
    pub fn try_next(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Receive the next envelope. Envelopes already queued when the
    /// subscription is closed are still delivered; afterwards `None`.
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    if self.token.is_cancelled() {
                        return None;
                    }
                    tokio::select! {
                        _ = self.token.cancelled() => {
                            return self.rx.try_recv().ok();
                        }
                        envelope = self.rx.recv() => return envelope,
                    }
                }
            }
        }
    }
}
