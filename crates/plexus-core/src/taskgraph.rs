//! Persisted task-graph model for the agent orchestrator.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Lifecycle of a whole graph. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraphStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Lifecycle of a single node: pending → running → (completed | failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-node execution record kept in `TaskGraph::node_states`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One step of a graph. `input` values may be whole-string templates of the
/// form `{{nodeId.output}}`, resolved from a dependency's result at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A persisted DAG of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraph {
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<TaskNode>,
    #[serde(default)]
    pub status: GraphStatus,
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
    #[serde(default)]
    pub node_results: HashMap<String, Value>,
    /// Principal the graph runs as; dispatches carry it for permission
    /// checks even after a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structural problems detected by [`TaskGraph::validate`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("dependency cycle involving node {0}")]
    Cycle(String),

    #[error("node {0} not found in graph")]
    NodeNotFound(String),
}

impl TaskGraph {
    /// Build a graph in its initial execution state.
    #[must_use]
    pub fn new(id: impl Into<String>, nodes: Vec<TaskNode>) -> Self {
        let mut graph = Self {
            id: id.into(),
            nodes,
            status: GraphStatus::Pending,
            node_states: HashMap::new(),
            node_results: HashMap::new(),
            app_id: None,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        graph.initialize();
        graph
    }

    /// Reset to the initial execution state: graph pending, every node
    /// pending, no results.
    pub fn initialize(&mut self) {
        self.status = GraphStatus::Pending;
        self.finished_at = None;
        self.error = None;
        self.node_results.clear();
        self.node_states = self
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeState::default()))
            .collect();
    }

    /// Check that every `dependsOn` reference resolves and the graph is
    /// acyclic (Kahn's algorithm).
    ///
    /// # Errors
    ///
    /// Returns the first structural defect found.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.depends_on.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for node in &self.nodes {
                if node.depends_on.iter().any(|d| d == id) {
                    let d = in_degree
                        .get_mut(node.id.as_str())
                        .expect("node present in degree map");
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(node.id.as_str());
                    }
                }
            }
        }
        if visited != self.nodes.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(id, _)| (*id).to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(())
    }

    /// Look up a node definition.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Current status of a node; `Pending` for unknown ids.
    #[must_use]
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_states
            .get(node_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Nodes that are pending and whose dependencies have all completed.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<&TaskNode> {
        self.nodes
            .iter()
            .filter(|n| self.node_status(&n.id) == NodeStatus::Pending)
            .filter(|n| {
                n.depends_on
                    .iter()
                    .all(|d| self.node_status(d) == NodeStatus::Completed)
            })
            .collect()
    }

    /// True when every node has completed.
    #[must_use]
    pub fn all_nodes_completed(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| self.node_status(&n.id) == NodeStatus::Completed)
    }

    /// True when the graph can no longer make progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, GraphStatus::Completed | GraphStatus::Failed)
    }
}
