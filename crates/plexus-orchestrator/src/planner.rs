//! Graph planner.
//!
//! Bridges natural-language requests to the orchestrator: `ai:agent`
//! requests are planned into task graphs by the AI backend and published as
//! `agent.taskgraph.created`; plain `ai:generate` requests get a text
//! response. The backend returns already-validated structures, so the only
//! failure mode here is surfacing its error on the `:error` topic.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{
    error_topic, new_graph_id, response_topic, AiBackend, Envelope, ErrorPayload,
    GraphCreatedPayload, PromptPayload, Topics,
};

use crate::error::OrchestratorError;

/// Turns prompts into task graphs and text responses.
pub struct GraphPlanner {
    broker: Broker,
    ai: Arc<dyn AiBackend>,
    shutdown: CancellationToken,
}

impl GraphPlanner {
    #[must_use]
    pub fn new(broker: Broker, ai: Arc<dyn AiBackend>) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            ai,
            shutdown,
        }
    }

    /// Subscribe to the AI request topics and start consuming.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscriptions cannot be set up.
    pub async fn start(self) -> Result<JoinHandle<()>, OrchestratorError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        for topic in [Topics::AI_AGENT, Topics::AI_GENERATE] {
            self.broker.topic(topic).await?.subscribe(handle.clone()).await?;
        }
        info!("graph planner listening");
        Ok(tokio::spawn(self.run(feed)))
    }

    async fn run(self, mut feed: SubscriberFeed) {
        let planner = Arc::new(self);
        loop {
            tokio::select! {
                _ = planner.shutdown.cancelled() => break,
                envelope = feed.next() => match envelope {
                    Some(envelope) => {
                        let planner = planner.clone();
                        tokio::spawn(async move { planner.handle_request(envelope).await });
                    }
                    None => break,
                },
            }
        }
        info!("graph planner stopped");
    }

    async fn handle_request(&self, envelope: Envelope) {
        let prompt = match envelope.payload_as::<PromptPayload>() {
            Ok(payload) if !payload.prompt.is_empty() => payload.prompt,
            Ok(_) => {
                self.publish_error(&envelope, "empty prompt").await;
                return;
            }
            Err(err) => {
                self.publish_error(&envelope, &format!("invalid prompt payload: {err}"))
                    .await;
                return;
            }
        };

        match envelope.topic.as_str() {
            Topics::AI_AGENT => self.plan_graph(&envelope, &prompt).await,
            Topics::AI_GENERATE => self.generate_text(&envelope, &prompt).await,
            other => warn!(topic = %other, "planner received unexpected topic"),
        }
    }

    async fn plan_graph(&self, request: &Envelope, prompt: &str) {
        let mut graph = match self.ai.generate_task_graph(prompt).await {
            Ok(graph) => graph,
            Err(err) => {
                self.publish_error(request, &err.to_string()).await;
                return;
            }
        };
        if graph.id.is_empty() {
            graph.id = new_graph_id();
        }
        info!(graph_id = %graph.id, nodes = graph.nodes.len(), "planned task graph");

        let payload = GraphCreatedPayload { task_graph: graph };
        let created = request
            .reply(Topics::GRAPH_CREATED, "agent_event")
            .with_payload(serde_json::to_value(&payload).unwrap_or_default());
        if let Err(err) = self.broker.publish(created).await {
            warn!(error = %err, "failed to publish created graph");
        }
    }

    async fn generate_text(&self, request: &Envelope, prompt: &str) {
        match self.ai.generate_text(prompt).await {
            Ok(text) => {
                let reply = request
                    .reply(response_topic(Topics::AI_GENERATE), "ai_response")
                    .with_payload(Value::String(text));
                if let Err(err) = self.broker.publish(reply).await {
                    warn!(error = %err, "failed to publish text response");
                }
            }
            Err(err) => self.publish_error(request, &err.to_string()).await,
        }
    }

    async fn publish_error(&self, request: &Envelope, message: &str) {
        warn!(topic = %request.topic, error = %message, "request failed");
        let payload = ErrorPayload {
            error: message.to_string(),
        };
        let reply = request
            .reply(error_topic(&request.topic), "error")
            .with_payload(serde_json::to_value(&payload).unwrap_or_default());
        if let Err(err) = self.broker.publish(reply).await {
            warn!(error = %err, "failed to publish error response");
        }
    }
}
