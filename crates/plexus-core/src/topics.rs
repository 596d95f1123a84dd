//! Canonical topic taxonomy.
//!
//! Request topics are colon-delimited (`ai:generate`, `vfs:read`,
//! `vm:create`). Success responses append `:resp` (AI) or `:result` (VFS);
//! errors append `:error`. Lifecycle events use dotted names: `agent.*`,
//! `vm.*` and `telemetry.vfs`.

/// Well-known topic names.
pub struct Topics;

impl Topics {
    // Agent lifecycle (dotted)
    pub const GRAPH_CREATED: &'static str = "agent.taskgraph.created";
    pub const GRAPH_STARTED: &'static str = "agent.taskgraph.started";
    pub const GRAPH_COMPLETED: &'static str = "agent.taskgraph.completed";
    pub const GRAPH_FAILED: &'static str = "agent.taskgraph.failed";
    pub const NODE_STARTED: &'static str = "agent.tasknode.started";
    pub const NODE_COMPLETED: &'static str = "agent.tasknode.completed";
    pub const NODE_FAILED: &'static str = "agent.tasknode.failed";

    /// Dispatch channel from the orchestrator to tool executors.
    pub const EXECUTE_NODE: &'static str = "agent:execute:node";

    // AI requests
    pub const AI_GENERATE: &'static str = "ai:generate";
    pub const AI_AGENT: &'static str = "ai:agent";
    pub const AI_SUMMARIZE_CODE: &'static str = "ai:summarize:code";

    // VFS requests
    pub const VFS_READ: &'static str = "vfs:read";
    pub const VFS_WRITE: &'static str = "vfs:write";
    pub const VFS_LIST: &'static str = "vfs:list";
    pub const VFS_DELETE: &'static str = "vfs:delete";
    pub const VFS_CREATE_FOLDER: &'static str = "vfs:create:folder";

    // Compute requests (colon) and runtime lifecycle events (dotted)
    pub const VM_CREATE: &'static str = "vm:create";
    pub const VM_KILL: &'static str = "vm:kill";
    pub const VM_STDIN: &'static str = "vm:stdin";
    pub const VM_STARTED: &'static str = "vm.started";
    pub const VM_STDOUT: &'static str = "vm.stdout";
    pub const VM_STDERR: &'static str = "vm.stderr";
    pub const VM_EXITED: &'static str = "vm.exited";
    pub const VM_KILLED: &'static str = "vm.killed";
    pub const VM_CRASHED: &'static str = "vm.crashed";

    /// File-system telemetry feed consumed by the sensor.
    pub const TELEMETRY_VFS: &'static str = "telemetry.vfs";
}

/// Success-response topic for an AI request (`:resp` suffix).
#[must_use]
pub fn response_topic(request: &str) -> String {
    format!("{request}:resp")
}

/// Success-response topic for a VFS request (`:result` suffix).
#[must_use]
pub fn result_topic(request: &str) -> String {
    format!("{request}:result")
}

/// Error topic for any request (`:error` suffix).
#[must_use]
pub fn error_topic(request: &str) -> String {
    format!("{request}:error")
}
