//! # plexus-bus
//!
//! Topic-based in-process message broker.
//!
//! Every topic is a single-owner actor: one consumer loop over a mailbox of
//! subscribe/unsubscribe/publish commands. Subscribers hold bounded queues;
//! a subscriber that cannot keep up is dropped, never the message for the
//! others. New subscribers receive the topic's bounded history before any
//! live envelope.

mod broker;
mod error;
mod subscriber;
mod topic;

pub use broker::Broker;
pub use error::BusError;
pub use subscriber::{Subscriber, SubscriberFeed, SubscriberHandle, SubscriberId};
pub use topic::TopicHandle;
