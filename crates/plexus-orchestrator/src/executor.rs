//! Tool executor.
//!
//! Consumes `agent:execute:node` dispatches and runs exactly one tool per
//! request. Every request produces exactly one terminal event, either
//! `agent.tasknode.completed` or `agent.tasknode.failed`, and both echo the
//! request's meta so `correlationId` and `graphId` keep propagating.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{
    AiBackend, Envelope, ExecuteNodePayload, NodeCompletedPayload, NodeEventPayload,
    NodeFailedPayload, ObjectStore, Permission, PolicyStore, Topics,
};

use crate::error::{ExecutorError, OrchestratorError};

/// Executes one DAG node's tool per dispatch envelope.
pub struct ToolExecutor {
    broker: Broker,
    objects: Arc<dyn ObjectStore>,
    ai: Arc<dyn AiBackend>,
    policy: Arc<dyn PolicyStore>,
    shutdown: CancellationToken,
}

impl ToolExecutor {
    #[must_use]
    pub fn new(
        broker: Broker,
        objects: Arc<dyn ObjectStore>,
        ai: Arc<dyn AiBackend>,
        policy: Arc<dyn PolicyStore>,
    ) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            objects,
            ai,
            policy,
            shutdown,
        }
    }

    /// Subscribe to the dispatch topic and start consuming.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscription cannot be set up.
    pub async fn start(self) -> Result<JoinHandle<()>, OrchestratorError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        self.broker
            .topic(Topics::EXECUTE_NODE)
            .await?
            .subscribe(handle)
            .await?;
        info!(topic = %Topics::EXECUTE_NODE, "tool executor listening");
        Ok(tokio::spawn(self.run(feed)))
    }

    async fn run(self, mut feed: SubscriberFeed) {
        let executor = Arc::new(self);
        loop {
            tokio::select! {
                _ = executor.shutdown.cancelled() => break,
                envelope = feed.next() => match envelope {
                    Some(envelope) => {
                        let executor = executor.clone();
                        tokio::spawn(async move { executor.handle_request(envelope).await });
                    }
                    None => break,
                },
            }
        }
        info!("tool executor stopped");
    }

    async fn handle_request(&self, envelope: Envelope) {
        let payload: ExecuteNodePayload = match envelope.payload_as() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "invalid dispatch payload");
                self.publish_failed(&envelope, "", "", &format!("invalid dispatch payload: {err}"))
                    .await;
                return;
            }
        };

        self.publish_node_event(
            &envelope,
            Topics::NODE_STARTED,
            NodeEventPayload {
                graph_id: payload.graph_id.clone(),
                node_id: payload.node_id.clone(),
            },
        )
        .await;

        let app_id = envelope.meta_view().app_id.unwrap_or_default();
        debug!(tool = %payload.tool, node_id = %payload.node_id, app_id = %app_id,
               "executing tool");

        // A long tool call observes cancellation and fails with "canceled".
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ExecutorError::Canceled),
            result = self.execute_tool(&app_id, &envelope, &payload) => result,
        };

        match outcome {
            Ok(result) => {
                debug!(tool = %payload.tool, node_id = %payload.node_id, "tool completed");
                self.publish_node_event(
                    &envelope,
                    Topics::NODE_COMPLETED,
                    NodeCompletedPayload {
                        graph_id: payload.graph_id,
                        node_id: payload.node_id,
                        result,
                    },
                )
                .await;
            }
            Err(err) => {
                warn!(tool = %payload.tool, node_id = %payload.node_id, error = %err,
                      "tool failed");
                self.publish_failed(&envelope, &payload.graph_id, &payload.node_id, &err.to_string())
                    .await;
            }
        }
    }

    async fn execute_tool(
        &self,
        app_id: &str,
        request: &Envelope,
        payload: &ExecuteNodePayload,
    ) -> Result<Value, ExecutorError> {
        let tool = payload.tool.as_str();
        let permission = required_permission(tool)
            .ok_or_else(|| ExecutorError::UnknownTool(tool.to_string()))?;
        if !self.policy.has_permission(app_id, permission).await {
            return Err(ExecutorError::PermissionDenied {
                app: app_id.to_string(),
                tool: tool.to_string(),
            });
        }

        match tool {
            "vfs:read" => {
                let path = input_str(&payload.input, "path", tool)?;
                let bytes = self.objects.read(path).await?;
                Ok(json!({"output": String::from_utf8_lossy(&bytes)}))
            }
            "vfs:write" => {
                let path = input_str(&payload.input, "path", tool)?;
                let content = input_str(&payload.input, "content", tool)?;
                self.objects.write(path, content.as_bytes()).await?;
                Ok(json!({"output": "ok"}))
            }
            "ai:summarize:code" => {
                let path = input_str(&payload.input, "filePath", tool)?;
                let bytes = self.objects.read(path).await?;
                let source = String::from_utf8_lossy(&bytes);
                let summary = self.ai.summarize_code(&source).await?;
                Ok(json!({"output": summary.summary}))
            }
            "vm:run" => {
                let wasm = input_str(&payload.input, "wasmBase64", tool)?;
                // The compute runtime owns the instance lifecycle; hand the
                // module over and report immediately.
                let create = Envelope::new(Topics::VM_CREATE, "executor_event")
                    .with_payload(json!({"wasmBase64": wasm}))
                    .with_meta(request.meta.clone());
                self.broker.publish(create).await?;
                Ok(json!({"output": "started"}))
            }
            _ => Err(ExecutorError::UnknownTool(tool.to_string())),
        }
    }

    async fn publish_failed(&self, request: &Envelope, graph_id: &str, node_id: &str, error: &str) {
        self.publish_node_event(
            request,
            Topics::NODE_FAILED,
            NodeFailedPayload {
                graph_id: graph_id.to_string(),
                node_id: node_id.to_string(),
                error: error.to_string(),
            },
        )
        .await;
    }

    async fn publish_node_event<P: serde::Serialize>(
        &self,
        request: &Envelope,
        topic: &str,
        payload: P,
    ) {
        let envelope = Envelope::new(topic, "executor_event")
            .with_payload(serde_json::to_value(&payload).unwrap_or_default())
            .with_meta(request.meta.clone());
        if let Err(err) = self.broker.publish(envelope).await {
            warn!(topic = %topic, error = %err, "failed to publish executor event");
        }
    }
}

/// Permission a tool requires. Unknown tools map to nothing and are denied
/// outright.
fn required_permission(tool: &str) -> Option<Permission> {
    match tool {
        // summarization reads the file before calling the backend
        "vfs:read" | "ai:summarize:code" => Some(Permission::FilesystemRead),
        "vfs:write" => Some(Permission::FilesystemWrite),
        "vm:run" => Some(Permission::VmRun),
        _ => None,
    }
}

fn input_str<'a>(
    input: &'a Map<String, Value>,
    key: &str,
    tool: &str,
) -> Result<&'a str, ExecutorError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ExecutorError::InvalidInput {
            tool: tool.to_string(),
            reason: format!("{key} must be a string"),
        })
}
