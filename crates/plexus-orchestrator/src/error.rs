//! Orchestrator error types.

use thiserror::Error;

use plexus_bus::BusError;
use plexus_core::{AiError, EnvelopeError, ObjectStoreError, StoreError};

/// Errors that can occur while driving a task graph.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Graph persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Bus publish or subscribe failed
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Event payload did not decode
    #[error(transparent)]
    Payload(#[from] EnvelopeError),
}

/// Errors raised while executing a single node's tool. The executor converts
/// every one of these into a `agent.tasknode.failed` event; tools are never
/// retried internally.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("permission denied for app '{app}' to use tool '{tool}'")]
    PermissionDenied { app: String, tool: String },

    #[error("invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error(transparent)]
    Storage(#[from] ObjectStoreError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("canceled")]
    Canceled,
}
