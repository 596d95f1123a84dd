//! Bus error types.

use thiserror::Error;

/// Errors that can occur on the message bus.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BusError {
    /// Topics are created on demand, so the only invalid name is an empty one
    #[error("topic name must not be empty")]
    EmptyTopicName,

    /// The broker has been cancelled; new publishes are rejected
    #[error("broker is shutting down")]
    ShuttingDown,

    /// The topic actor has exited
    #[error("topic mailbox closed")]
    MailboxClosed,

    /// Non-blocking push hit a full subscriber queue
    #[error("subscriber queue full")]
    QueueFull,

    /// The subscriber's queue has already been closed
    #[error("subscriber queue closed")]
    SubscriberClosed,
}
