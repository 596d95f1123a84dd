//! Traits for external collaborators.
//!
//! The broker core treats the AI backend, blob storage, the WASM runtime,
//! graph persistence, authentication and app policy as interchangeable
//! implementations behind these interfaces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AiError, AuthError, ComputeError, ObjectStoreError, StoreError};
use crate::taskgraph::TaskGraph;

/// Structured result of a code summarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSummary {
    pub summary: String,
}

/// LLM backend. Implementations return already-validated values; the core
/// never scrapes JSON out of fenced code blocks.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Free-form text generation.
    async fn generate_text(&self, prompt: &str) -> Result<String, AiError>;

    /// Plan a task graph from a natural-language request.
    async fn generate_task_graph(&self, prompt: &str) -> Result<TaskGraph, AiError>;

    /// Summarize a source file.
    async fn summarize_code(&self, source: &str) -> Result<CodeSummary, AiError>;
}

/// Directory entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Blob/content storage behind the virtual file system.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError>;
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), ObjectStoreError>;
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, ObjectStoreError>;
    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError>;
    async fn create_dir(&self, parent: &str, name: &str) -> Result<(), ObjectStoreError>;
}

/// WASM instance lifecycle. The runtime publishes its own `vm.*` lifecycle
/// events (stdout, stderr, exited, crashed) while instances run.
#[async_trait]
pub trait ComputeRuntime: Send + Sync {
    /// Instantiate a module; returns the instance id.
    async fn create(&self, wasm: Vec<u8>) -> Result<String, ComputeError>;

    /// Terminate an instance.
    async fn kill(&self, instance_id: &str) -> Result<(), ComputeError>;

    /// Write to an instance's stdin.
    async fn stdin(&self, instance_id: &str, data: &[u8]) -> Result<(), ComputeError>;
}

/// Mutation applied inside a [`GraphStore::update`] transaction. Returning
/// an error aborts the commit; [`StoreError::Conflict`] is the conventional
/// way to abandon a compare-and-set that observed unexpected state.
pub type GraphUpdate = Box<dyn FnOnce(&mut TaskGraph) -> Result<(), StoreError> + Send>;

/// Graph persistence with serializable transactions on a single graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Atomically write a whole graph.
    async fn put(&self, graph: &TaskGraph) -> Result<(), StoreError>;

    /// Load a graph.
    async fn get(&self, graph_id: &str) -> Result<TaskGraph, StoreError>;

    /// Run a read-modify-write transaction on one graph and return the
    /// committed state.
    async fn update(&self, graph_id: &str, apply: GraphUpdate) -> Result<TaskGraph, StoreError>;

    /// Enumerate stored graphs, used for crash rehydration.
    async fn list(&self) -> Result<Vec<TaskGraph>, StoreError>;
}

/// Identity established when a client authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

/// Token validation at the gateway boundary.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Capabilities an app can hold in its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    FilesystemRead,
    FilesystemWrite,
    VmRun,
}

impl Permission {
    /// The manifest string for this permission.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::FilesystemRead => "filesystem_read",
            Permission::FilesystemWrite => "filesystem_write",
            Permission::VmRun => "vm_run",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// App manifest / permission lookup.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Whether `app_id` holds `permission`. Unknown apps hold nothing.
    async fn has_permission(&self, app_id: &str, permission: Permission) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_manifest_strings() {
        assert_eq!(Permission::FilesystemRead.as_str(), "filesystem_read");
        assert_eq!(Permission::FilesystemWrite.as_str(), "filesystem_write");
        assert_eq!(Permission::VmRun.as_str(), "vm_run");
    }

    #[test]
    fn permission_serde_matches_manifest_strings() {
        let p: Permission = serde_json::from_str("\"filesystem_read\"").unwrap();
        assert_eq!(p, Permission::FilesystemRead);
    }
}
