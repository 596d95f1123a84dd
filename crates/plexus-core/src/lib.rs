//! # plexus-core
//!
//! Core types shared by every Plexus crate.
//!
//! Provides:
//! - The [`Envelope`] wire format and its typed payloads
//! - [`TaskGraph`] / [`TaskNode`] for the agent orchestrator
//! - The canonical topic taxonomy
//! - Narrow traits for external collaborators (AI backend, object store,
//!   compute runtime, graph persistence, auth, policy)

mod config;
mod envelope;
mod error;
mod id;
mod payload;
mod retry;
mod taskgraph;
mod topics;
mod traits;

pub use config::{
    AuthConfig, BusConfig, PlexusConfig, SensorConfig, ServerConfig, SessionConfig,
};
pub use envelope::{Envelope, EnvelopeMeta};
pub use error::{
    AiError, AuthError, ComputeError, EnvelopeError, ObjectStoreError, StoreError,
};
pub use id::{new_graph_id, new_id};
pub use payload::{
    ErrorPayload, ExecuteNodePayload, GraphCreatedPayload, GraphEventPayload,
    NodeCompletedPayload, NodeEventPayload, NodeFailedPayload, PromptPayload, SensorEvent,
    VfsEvent,
};
pub use retry::with_backoff;
pub use taskgraph::{GraphError, GraphStatus, NodeState, NodeStatus, TaskGraph, TaskNode};
pub use topics::{error_topic, response_topic, result_topic, Topics};
pub use traits::{
    AiBackend, CodeSummary, ComputeRuntime, FileInfo, GraphStore, GraphUpdate, ObjectStore,
    Permission, PolicyStore, Principal, TokenVerifier,
};
