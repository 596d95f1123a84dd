//! Per-topic actor.
//!
//! A topic owns its subscriber set and history ring exclusively; all
//! mutation happens inside one consumer loop over the command mailbox.
//! Publishers may block on the mailbox, but the topic never blocks on a
//! subscriber: pushes are non-blocking and a full subscriber is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use plexus_core::{BusConfig, Envelope};

use crate::error::BusError;
use crate::subscriber::{SubscriberHandle, SubscriberId};

enum Command {
    Subscribe(SubscriberHandle),
    Unsubscribe(SubscriberId),
    Publish(Envelope),
}

/// Handle to a running topic actor. Cheap to clone.
#[derive(Clone)]
pub struct TopicHandle {
    name: Arc<str>,
    tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl TopicHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a subscriber. The current history snapshot is replayed into
    /// its queue before any subsequently published envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MailboxClosed`] when the actor has exited.
    pub async fn subscribe(&self, subscriber: SubscriberHandle) -> Result<(), BusError> {
        self.send(Command::Subscribe(subscriber)).await
    }

    /// Detach a subscriber and close its queue. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MailboxClosed`] when the actor has exited.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), BusError> {
        self.send(Command::Unsubscribe(id)).await
    }

    /// Publish an envelope to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ShuttingDown`] once the broker is cancelled.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::ShuttingDown);
        }
        self.send(Command::Publish(envelope)).await
    }

    async fn send(&self, command: Command) -> Result<(), BusError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BusError::MailboxClosed)
    }
}

/// Start the actor for `name` and return its handle.
pub(crate) fn spawn(name: &str, config: &BusConfig, shutdown: CancellationToken) -> TopicHandle {
    let name: Arc<str> = Arc::from(name);
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let actor = TopicActor {
        name: name.clone(),
        subscribers: HashMap::new(),
        history: VecDeque::with_capacity(config.history_len),
        history_len: config.history_len,
    };
    let drain_timeout = Duration::from_millis(config.drain_timeout_ms);
    tokio::spawn(actor.run(rx, shutdown.clone(), drain_timeout));
    TopicHandle { name, tx, shutdown }
}

struct TopicActor {
    name: Arc<str>,
    subscribers: HashMap<SubscriberId, SubscriberHandle>,
    history: VecDeque<Envelope>,
    history_len: usize,
}

impl TopicActor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
        drain_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    self.drain(&mut rx, drain_timeout);
                    break;
                }
            }
        }
        for subscriber in self.subscribers.values() {
            subscriber.close();
        }
        debug!(topic = %self.name, "topic actor stopped");
    }

    /// Consume whatever was already mailed before the cancellation, bounded
    /// by the drain timeout.
    fn drain(&mut self, rx: &mut mpsc::Receiver<Command>, timeout: Duration) {
        let started = Instant::now();
        while started.elapsed() < timeout {
            match rx.try_recv() {
                Ok(command) => self.handle(command),
                Err(_) => break,
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe(subscriber) => self.on_subscribe(subscriber),
            Command::Unsubscribe(id) => self.on_unsubscribe(&id),
            Command::Publish(envelope) => self.on_publish(envelope),
        }
    }

    fn on_subscribe(&mut self, subscriber: SubscriberHandle) {
        // No command interleaves with the replay: the actor loop is the only
        // consumer, so replay-then-insert is atomic from the outside.
        for envelope in &self.history {
            if let Err(err) = subscriber.push(envelope.clone()) {
                warn!(topic = %self.name, subscriber = %subscriber.id(), error = %err,
                      "history replay overflowed queue, dropping subscriber");
                subscriber.close();
                return;
            }
        }
        debug!(topic = %self.name, subscriber = %subscriber.id(), "subscribed");
        self.subscribers.insert(subscriber.id().clone(), subscriber);
    }

    fn on_unsubscribe(&mut self, id: &SubscriberId) {
        if let Some(subscriber) = self.subscribers.remove(id) {
            subscriber.close();
            debug!(topic = %self.name, subscriber = %id, "unsubscribed");
        }
    }

    fn on_publish(&mut self, envelope: Envelope) {
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(envelope.clone());

        let mut dropped = Vec::new();
        for (id, subscriber) in &self.subscribers {
            if let Err(err) = subscriber.push(envelope.clone()) {
                warn!(topic = %self.name, subscriber = %id, error = %err,
                      "dropping slow subscriber");
                dropped.push(id.clone());
            }
        }
        for id in dropped {
            self.on_unsubscribe(&id);
        }
    }
}
