//! Stand-ins for collaborators that are not wired in.
//!
//! The broker and orchestrator run fine without an AI backend or a WASM
//! runtime; requests that need one fail with an explicit "not configured"
//! error instead of hanging or panicking.

use async_trait::async_trait;

use plexus_core::{AiBackend, AiError, CodeSummary, ComputeError, ComputeRuntime, TaskGraph};

/// [`AiBackend`] that rejects every call.
pub struct UnconfiguredAi;

#[async_trait]
impl AiBackend for UnconfiguredAi {
    async fn generate_text(&self, _prompt: &str) -> Result<String, AiError> {
        Err(AiError::NotConfigured)
    }

    async fn generate_task_graph(&self, _prompt: &str) -> Result<TaskGraph, AiError> {
        Err(AiError::NotConfigured)
    }

    async fn summarize_code(&self, _source: &str) -> Result<CodeSummary, AiError> {
        Err(AiError::NotConfigured)
    }
}

/// [`ComputeRuntime`] that rejects every call.
pub struct UnconfiguredCompute;

#[async_trait]
impl ComputeRuntime for UnconfiguredCompute {
    async fn create(&self, _wasm: Vec<u8>) -> Result<String, ComputeError> {
        Err(ComputeError::NotConfigured)
    }

    async fn kill(&self, _instance_id: &str) -> Result<(), ComputeError> {
        Err(ComputeError::NotConfigured)
    }

    async fn stdin(&self, _instance_id: &str, _data: &[u8]) -> Result<(), ComputeError> {
        Err(ComputeError::NotConfigured)
    }
}
