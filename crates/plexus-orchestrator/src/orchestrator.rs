//! The task-graph orchestrator.
//!
//! Subscribes to `agent.taskgraph.created`, `agent.tasknode.completed` and
//! `agent.tasknode.failed` and processes them strictly serially through one
//! mailbox, so state transitions on any graph are linearizable within this
//! process. The persistent [`GraphStore`] is the single source of truth:
//! no authoritative in-memory copy outlives a single event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{
    with_backoff, Envelope, EnvelopeMeta, ExecuteNodePayload, GraphCreatedPayload,
    GraphEventPayload, GraphStatus, GraphStore, NodeCompletedPayload, NodeFailedPayload,
    NodeStatus, StoreError, TaskNode, Topics,
};

use crate::error::OrchestratorError;
use crate::template;

/// Event-driven DAG executor. Owns all graph mutation.
pub struct AgentOrchestrator {
    broker: Broker,
    store: Arc<dyn GraphStore>,
    shutdown: CancellationToken,
}

impl AgentOrchestrator {
    #[must_use]
    pub fn new(broker: Broker, store: Arc<dyn GraphStore>) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            store,
            shutdown,
        }
    }

    /// Rehydrate persisted graphs, subscribe to the agent topics and start
    /// the serial event loop.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial subscriptions cannot be set up or
    /// the store stays unreachable through the rehydration retries.
    pub async fn start(self) -> Result<JoinHandle<()>, OrchestratorError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        for topic in [
            Topics::GRAPH_CREATED,
            Topics::NODE_COMPLETED,
            Topics::NODE_FAILED,
        ] {
            self.broker.topic(topic).await?.subscribe(handle.clone()).await?;
        }

        self.rehydrate().await?;

        info!("agent orchestrator running");
        Ok(tokio::spawn(self.run(feed)))
    }

    async fn run(self, mut feed: SubscriberFeed) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = feed.next() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
            }
        }
        info!("agent orchestrator stopped");
    }

    async fn dispatch(&self, envelope: Envelope) {
        let result = match envelope.topic.as_str() {
            Topics::GRAPH_CREATED => self.handle_graph_created(&envelope).await,
            Topics::NODE_COMPLETED => self.handle_node_completed(&envelope).await,
            Topics::NODE_FAILED => self.handle_node_failed(&envelope).await,
            other => {
                debug!(topic = %other, "ignoring event on unexpected topic");
                Ok(())
            }
        };
        // A dropped event is re-reconciled by the next event on the same
        // graph; the store remains the source of truth.
        if let Err(err) = result {
            warn!(topic = %envelope.topic, error = %err, "event dropped");
        }
    }

    /// Reset indeterminate (`running`) nodes left over from a crash and
    /// resume scheduling. Idempotent across restarts.
    async fn rehydrate(&self) -> Result<(), OrchestratorError> {
        let graphs = with_backoff(3, Duration::from_millis(200), || self.store.list()).await?;
        for graph in graphs {
            if graph.is_terminal() {
                continue;
            }
            let graph_id = graph.id.clone();
            self.store
                .update(
                    &graph_id,
                    Box::new(|g| {
                        for state in g.node_states.values_mut() {
                            if state.status == NodeStatus::Running {
                                state.status = NodeStatus::Pending;
                                state.started_at = None;
                            }
                        }
                        Ok(())
                    }),
                )
                .await?;
            info!(graph_id = %graph_id, "rehydrated task graph");

            let trigger = Envelope::new(Topics::GRAPH_CREATED, "agent_event")
                .with_meta(EnvelopeMeta {
                    graph_id: Some(graph_id.clone()),
                    source: Some("rehydration".to_string()),
                    ..EnvelopeMeta::default()
                }.to_value());
            self.evaluate_and_run_next_nodes(&graph_id, &trigger).await?;
        }
        Ok(())
    }

    async fn handle_graph_created(&self, envelope: &Envelope) -> Result<(), OrchestratorError> {
        let payload: GraphCreatedPayload = envelope.payload_as()?;
        let mut graph = payload.task_graph;
        graph.initialize();
        // Bind the requesting principal to the graph so permission checks
        // keep working for dispatches after a restart.
        if let Some(app_id) = envelope.meta_view().app_id {
            graph.app_id = Some(app_id);
        }

        if let Err(defect) = graph.validate() {
            warn!(graph_id = %graph.id, error = %defect, "rejecting malformed task graph");
            graph.status = GraphStatus::Failed;
            graph.finished_at = Some(Utc::now());
            graph.error = Some(defect.to_string());
            self.store.put(&graph).await?;
            self.publish_graph_event(
                Topics::GRAPH_FAILED,
                &graph.id,
                Some(defect.to_string()),
                envelope,
            )
            .await;
            return Ok(());
        }

        self.store.put(&graph).await?;
        info!(graph_id = %graph.id, nodes = graph.nodes.len(), "registered task graph");

        self.publish_graph_event(Topics::GRAPH_STARTED, &graph.id, None, envelope)
            .await;
        self.evaluate_and_run_next_nodes(&graph.id, envelope).await
    }

    async fn handle_node_completed(&self, envelope: &Envelope) -> Result<(), OrchestratorError> {
        let payload: NodeCompletedPayload = envelope.payload_as()?;
        let graph_id = payload.graph_id.clone();
        let node_id = payload.node_id.clone();

        let committed = {
            let node_id = node_id.clone();
            self.store
                .update(
                    &graph_id,
                    Box::new(move |g| {
                        let state = g.node_states.get_mut(&node_id).ok_or_else(|| {
                            StoreError::Conflict(format!("node {node_id} not in graph"))
                        })?;
                        if state.status != NodeStatus::Running {
                            return Err(StoreError::Conflict(format!(
                                "node {node_id} is not running"
                            )));
                        }
                        state.status = NodeStatus::Completed;
                        state.finished_at = Some(Utc::now());
                        g.node_results.insert(node_id.clone(), payload.result);
                        Ok(())
                    }),
                )
                .await
        };

        match committed {
            Ok(_) => {
                debug!(graph_id = %graph_id, node_id = %node_id, "node completed");
                self.evaluate_and_run_next_nodes(&graph_id, envelope).await
            }
            Err(StoreError::Conflict(reason)) => {
                debug!(graph_id = %graph_id, node_id = %node_id, reason = %reason,
                       "stale completion ignored");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                debug!(graph_id = %graph_id, "completion for unknown graph ignored");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn handle_node_failed(&self, envelope: &Envelope) -> Result<(), OrchestratorError> {
        let payload: NodeFailedPayload = envelope.payload_as()?;
        self.fail_node(&payload.graph_id, &payload.node_id, &payload.error, envelope)
            .await
    }

    /// Mark a node failed and move the graph to its terminal failed state.
    /// No further nodes are scheduled afterwards.
    async fn fail_node(
        &self,
        graph_id: &str,
        node_id: &str,
        error: &str,
        trigger: &Envelope,
    ) -> Result<(), OrchestratorError> {
        let graph_error = format!("Execution failed at node {node_id}");
        let committed = {
            let node_id = node_id.to_string();
            let error = error.to_string();
            let graph_error = graph_error.clone();
            self.store
                .update(
                    graph_id,
                    Box::new(move |g| {
                        if g.is_terminal() {
                            return Err(StoreError::Conflict(
                                "graph already terminal".to_string(),
                            ));
                        }
                        if let Some(state) = g.node_states.get_mut(&node_id) {
                            state.status = NodeStatus::Failed;
                            state.finished_at = Some(Utc::now());
                            state.error = Some(error);
                        }
                        g.status = GraphStatus::Failed;
                        g.finished_at = Some(Utc::now());
                        g.error = Some(graph_error);
                        Ok(())
                    }),
                )
                .await
        };

        match committed {
            Ok(_) => {
                warn!(graph_id = %graph_id, node_id = %node_id, error = %error,
                      "node failed, halting graph");
                self.publish_graph_event(Topics::GRAPH_FAILED, graph_id, Some(graph_error), trigger)
                    .await;
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                debug!(graph_id = %graph_id, node_id = %node_id,
                       "failure for unknown graph ignored");
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// The scheduling pass: dispatch every ready node, or finish the graph
    /// when nothing is left to run.
    async fn evaluate_and_run_next_nodes(
        &self,
        graph_id: &str,
        trigger: &Envelope,
    ) -> Result<(), OrchestratorError> {
        let graph = self.store.get(graph_id).await?;
        if graph.is_terminal() {
            return Ok(());
        }

        let ready: Vec<TaskNode> = graph.ready_nodes().into_iter().cloned().collect();
        if ready.is_empty() {
            if graph.all_nodes_completed() {
                self.complete_graph(graph_id, trigger).await?;
            }
            return Ok(());
        }

        for node in ready {
            let resolved = match template::resolve_input(&graph, &node.input) {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(graph_id = %graph_id, node_id = %node.id, error = %err,
                          "input resolution failed");
                    // Surface the failure as a real node-failed event; it
                    // flows back through the mailbox and terminates the
                    // graph like any executor failure.
                    let failure = Envelope::new(Topics::NODE_FAILED, "agent_event")
                        .with_payload(
                            serde_json::to_value(&NodeFailedPayload {
                                graph_id: graph_id.to_string(),
                                node_id: node.id.clone(),
                                error: err.to_string(),
                            })
                            .unwrap_or_default(),
                        )
                        .with_meta(self.dispatch_meta(graph_id, graph.app_id.as_deref(), trigger));
                    if let Err(publish_err) = self.broker.publish(failure).await {
                        warn!(graph_id = %graph_id, error = %publish_err,
                              "failed to publish resolution failure");
                    }
                    continue;
                }
            };

            // pending → running compare-and-set; losing it means the node was
            // already dispatched (or the graph went terminal), so skip.
            let cas = {
                let node_id = node.id.clone();
                self.store
                    .update(
                        graph_id,
                        Box::new(move |g| {
                            if g.is_terminal() {
                                return Err(StoreError::Conflict(
                                    "graph already terminal".to_string(),
                                ));
                            }
                            let state = g.node_states.get_mut(&node_id).ok_or_else(|| {
                                StoreError::Conflict(format!("node {node_id} not in graph"))
                            })?;
                            if state.status != NodeStatus::Pending {
                                return Err(StoreError::Conflict(format!(
                                    "node {node_id} already dispatched"
                                )));
                            }
                            state.status = NodeStatus::Running;
                            state.started_at = Some(Utc::now());
                            if g.status == GraphStatus::Pending {
                                g.status = GraphStatus::Running;
                            }
                            Ok(())
                        }),
                    )
                    .await
            };
            match cas {
                Ok(_) => {}
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }

            debug!(graph_id = %graph_id, node_id = %node.id, tool = %node.tool,
                   "dispatching node");
            let payload = ExecuteNodePayload {
                graph_id: graph_id.to_string(),
                node_id: node.id.clone(),
                tool: node.tool.clone(),
                input: resolved,
            };
            let envelope = Envelope::new(Topics::EXECUTE_NODE, "agent_event")
                .with_payload(serde_json::to_value(&payload).unwrap_or_default())
                .with_meta(self.dispatch_meta(graph_id, graph.app_id.as_deref(), trigger));
            self.broker.publish(envelope).await?;
        }
        Ok(())
    }

    async fn complete_graph(
        &self,
        graph_id: &str,
        trigger: &Envelope,
    ) -> Result<(), OrchestratorError> {
        let committed = self
            .store
            .update(
                graph_id,
                Box::new(|g| {
                    if g.is_terminal() {
                        return Err(StoreError::Conflict("graph already terminal".to_string()));
                    }
                    g.status = GraphStatus::Completed;
                    g.finished_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await;
        match committed {
            Ok(_) => {
                info!(graph_id = %graph_id, "task graph completed");
                self.publish_graph_event(Topics::GRAPH_COMPLETED, graph_id, None, trigger)
                    .await;
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Meta for dispatches and lifecycle events: the triggering envelope's
    /// meta with `correlationId` pinned to the trigger, `graphId` pinned to
    /// the graph, and `appId` falling back to the principal persisted on the
    /// graph (rehydration triggers carry none of their own).
    fn dispatch_meta(
        &self,
        graph_id: &str,
        app_id: Option<&str>,
        trigger: &Envelope,
    ) -> serde_json::Value {
        let mut meta = trigger.meta_view();
        meta.correlation_id = Some(trigger.id.clone());
        meta.graph_id = Some(graph_id.to_string());
        if meta.app_id.is_none() {
            meta.app_id = app_id.map(str::to_string);
        }
        meta.merged_into(&trigger.meta)
    }

    async fn publish_graph_event(
        &self,
        topic: &str,
        graph_id: &str,
        error: Option<String>,
        trigger: &Envelope,
    ) {
        let payload = GraphEventPayload {
            graph_id: graph_id.to_string(),
            error,
        };
        let envelope = Envelope::new(topic, "agent_event")
            .with_payload(serde_json::to_value(&payload).unwrap_or_default())
            .with_meta(self.dispatch_meta(graph_id, None, trigger));
        if let Err(err) = self.broker.publish(envelope).await {
            warn!(topic = %topic, graph_id = %graph_id, error = %err,
                  "failed to publish graph event");
        }
    }
}
