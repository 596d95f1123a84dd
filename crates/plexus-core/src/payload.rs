//! Typed envelope payloads.
//!
//! Payloads are discriminated by topic at each component's ingress boundary
//! and deserialized exactly once; past that point components hold these
//! strongly-typed values instead of raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::taskgraph::TaskGraph;

/// `agent.taskgraph.created`: a full graph to register and execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCreatedPayload {
    pub task_graph: TaskGraph,
}

/// `agent.tasknode.completed`: terminal success of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCompletedPayload {
    pub graph_id: String,
    pub node_id: String,
    #[serde(default)]
    pub result: Value,
}

/// `agent.tasknode.failed`: terminal failure of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailedPayload {
    pub graph_id: String,
    pub node_id: String,
    pub error: String,
}

/// `agent.tasknode.started`: a node began executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEventPayload {
    pub graph_id: String,
    pub node_id: String,
}

/// `agent:execute:node`: dispatch of one node to a tool executor, with
/// the node's input already template-resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteNodePayload {
    pub graph_id: String,
    pub node_id: String,
    pub tool: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// `agent.taskgraph.{started,completed,failed}`: graph lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEventPayload {
    pub graph_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `ai:agent` / `ai:generate`: a natural-language request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub prompt: String,
}

/// Error payload published on `:error` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// A generic event captured by a kernel sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEvent {
    /// Sensor family, e.g. `"vfs"` or `"compute"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// A file-system operation observed by the VFS service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VfsEvent {
    pub operation: String,
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}
