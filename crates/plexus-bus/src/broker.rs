//! Topic registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use plexus_core::{BusConfig, Envelope};

use crate::error::BusError;
use crate::topic::{self, TopicHandle};

/// Manages the lifecycle of topics. Topics are created lazily on first use
/// and live for the broker's lifetime; memory stays bounded through bounded
/// history rings and bounded subscriber queues.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    topics: RwLock<HashMap<String, TopicHandle>>,
    config: BusConfig,
    shutdown: CancellationToken,
}

impl Broker {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: RwLock::new(HashMap::new()),
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Return the topic named `name`, creating and starting it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::EmptyTopicName`] for the empty name; every other
    /// name is valid.
    pub async fn topic(&self, name: &str) -> Result<TopicHandle, BusError> {
        if name.is_empty() {
            return Err(BusError::EmptyTopicName);
        }
        {
            let topics = self.inner.topics.read().await;
            if let Some(handle) = topics.get(name) {
                return Ok(handle.clone());
            }
        }

        let mut topics = self.inner.topics.write().await;
        // Double check: another task may have created it between the locks.
        if let Some(handle) = topics.get(name) {
            return Ok(handle.clone());
        }
        debug!(topic = %name, "creating topic");
        let handle = topic::spawn(name, &self.inner.config, self.inner.shutdown.clone());
        topics.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Publish to the topic named in the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::EmptyTopicName`] when the envelope has no topic,
    /// [`BusError::ShuttingDown`] after cancellation.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        let handle = self.topic(&envelope.topic).await?;
        handle.publish(envelope).await
    }

    /// The broker's subscriber queue capacity, for components that create
    /// their own feeds.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity
    }

    /// A child token that is cancelled when the broker shuts down.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    /// Stop accepting publishes, let topic mailboxes drain, then close every
    /// subscriber queue. Waits out the configured drain window.
    pub async fn shutdown(&self) {
        info!("broker shutting down");
        self.inner.shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(self.inner.config.drain_timeout_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Subscriber;
    use serde_json::json;

    fn envelope(id: &str, topic: &str) -> Envelope {
        let mut env = Envelope::new(topic, "test");
        env.id = id.to_string();
        env
    }

    fn broker() -> Broker {
        Broker::new(BusConfig::default())
    }

    #[tokio::test]
    async fn empty_topic_name_is_rejected() {
        assert_eq!(broker().topic("").await.err(), Some(BusError::EmptyTopicName));
    }

    #[tokio::test]
    async fn topic_handles_are_shared() {
        let broker = broker();
        let a = broker.topic("t").await.unwrap();
        let b = broker.topic("t").await.unwrap();
        assert_eq!(a.name(), b.name());
    }

    #[tokio::test]
    async fn echo_between_two_subscribers() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();

        let (handle_b, mut feed_b) = Subscriber::channel(16);
        topic.subscribe(handle_b).await.unwrap();

        let env = envelope("a1", "t").with_payload(json!(1));
        broker.publish(env).await.unwrap();

        let received = feed_b.next().await.unwrap();
        assert_eq!(received.id, "a1");
        assert_eq!(received.payload, json!(1));
    }

    #[tokio::test]
    async fn history_replays_in_order_before_live_traffic() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();

        for id in ["h1", "h2", "h3"] {
            topic.publish(envelope(id, "t")).await.unwrap();
        }

        let (handle, mut feed) = Subscriber::channel(16);
        topic.subscribe(handle).await.unwrap();
        topic.publish(envelope("h4", "t")).await.unwrap();

        for expected in ["h1", "h2", "h3", "h4"] {
            assert_eq!(feed.next().await.unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let config = BusConfig {
            history_len: 3,
            ..BusConfig::default()
        };
        let broker = Broker::new(config);
        let topic = broker.topic("t").await.unwrap();
        for i in 0..5 {
            topic.publish(envelope(&format!("e{i}"), "t")).await.unwrap();
        }

        let (handle, mut feed) = Subscriber::channel(16);
        topic.subscribe(handle).await.unwrap();
        topic.publish(envelope("live", "t")).await.unwrap();

        for expected in ["e2", "e3", "e4", "live"] {
            assert_eq!(feed.next().await.unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn single_publisher_fifo_per_subscriber() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();
        let (handle, mut feed) = Subscriber::channel(512);
        topic.subscribe(handle).await.unwrap();

        for i in 0..100 {
            topic.publish(envelope(&format!("m{i}"), "t")).await.unwrap();
        }
        for i in 0..100 {
            assert_eq!(feed.next().await.unwrap().id, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_without_losing_the_message_for_others() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();

        // C never drains and overflows at its queue bound; D has room for
        // the full burst.
        let (handle_c, mut feed_c) = Subscriber::channel(256);
        let (handle_d, mut feed_d) = Subscriber::channel(512);
        topic.subscribe(handle_c).await.unwrap();
        topic.subscribe(handle_d).await.unwrap();

        for i in 0..300 {
            topic.publish(envelope(&format!("m{i}"), "t")).await.unwrap();
        }

        // D got every message, including the one that evicted C.
        for i in 0..300 {
            assert_eq!(feed_d.next().await.unwrap().id, format!("m{i}"));
        }

        // C got its buffered prefix, then the closed queue.
        for i in 0..256 {
            assert_eq!(feed_c.next().await.unwrap().id, format!("m{i}"));
        }
        assert!(feed_c.next().await.is_none());
    }

    #[tokio::test]
    async fn replay_overflow_drops_the_subscriber_immediately() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();
        for i in 0..10 {
            topic.publish(envelope(&format!("h{i}"), "t")).await.unwrap();
        }

        let (handle, mut feed) = Subscriber::channel(4);
        topic.subscribe(handle).await.unwrap();

        for i in 0..4 {
            assert_eq!(feed.next().await.unwrap().id, format!("h{i}"));
        }
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broker = broker();
        let topic = broker.topic("t").await.unwrap();
        let (handle, mut feed) = Subscriber::channel(4);
        let id = handle.id().clone();
        topic.subscribe(handle).await.unwrap();

        topic.unsubscribe(id.clone()).await.unwrap();
        topic.unsubscribe(id).await.unwrap();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_publishes_and_closes_queues() {
        let config = BusConfig {
            drain_timeout_ms: 50,
            ..BusConfig::default()
        };
        let broker = Broker::new(config);
        let topic = broker.topic("t").await.unwrap();
        let (handle, mut feed) = Subscriber::channel(4);
        topic.subscribe(handle).await.unwrap();
        topic.publish(envelope("before", "t")).await.unwrap();

        broker.shutdown().await;

        assert_eq!(
            topic.publish(envelope("after", "t")).await,
            Err(BusError::ShuttingDown)
        );
        // the pre-shutdown envelope drained, then the queue closed
        assert_eq!(feed.next().await.unwrap().id, "before");
        assert!(feed.next().await.is_none());
    }
}
