//! Error types for the core wire format and the collaborator traits.

use thiserror::Error;

/// Envelope codec failures.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The bytes or value did not match the envelope schema
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Publishing requires a non-empty topic
    #[error("envelope has no topic")]
    MissingTopic,
}

/// Errors surfaced by an [`crate::AiBackend`].
#[derive(Error, Debug)]
pub enum AiError {
    /// The upstream model call failed
    #[error("AI backend error: {0}")]
    Upstream(String),

    /// No backend has been wired in
    #[error("AI backend is not configured")]
    NotConfigured,
}

/// Errors surfaced by an [`crate::ObjectStore`].
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// Path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Path is syntactically invalid
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Backend I/O failure
    #[error("storage error: {0}")]
    Io(String),
}

/// Errors surfaced by a [`crate::ComputeRuntime`].
#[derive(Error, Debug)]
pub enum ComputeError {
    /// No instance with that id
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The WASM bytes could not be instantiated
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Runtime-level failure
    #[error("compute runtime error: {0}")]
    Runtime(String),

    /// No runtime has been wired in
    #[error("compute runtime is not configured")]
    NotConfigured,
}

/// Errors surfaced by a [`crate::GraphStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Graph does not exist
    #[error("graph not found: {0}")]
    NotFound(String),

    /// A transactional update observed state it must not overwrite;
    /// the commit was aborted
    #[error("conflict: {0}")]
    Conflict(String),

    /// Retryable persistence failure; the event that triggered the write
    /// may be dropped and reconciled later
    #[error("transient persistence error: {0}")]
    Transient(String),

    /// Non-retryable persistence failure
    #[error("fatal persistence error: {0}")]
    Fatal(String),

    /// Stored bytes did not decode
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by a [`crate::TokenVerifier`].
#[derive(Error, Debug)]
pub enum AuthError {
    /// No token was presented
    #[error("missing token")]
    MissingToken,

    /// The token did not verify
    #[error("invalid token")]
    InvalidToken,
}
