//! Compute service.
//!
//! Consumes `vm:create`, `vm:kill` and `vm:stdin` requests and hands them to
//! the compute runtime. The runtime itself owns instance lifecycles and
//! publishes `vm.stdout` / `vm.stderr` / `vm.exited` / `vm.crashed` while
//! instances run; this service only reports the transitions it performs.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{error_topic, ComputeRuntime, Envelope, Topics};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    wasm_base64: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceRequest {
    instance_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StdinRequest {
    instance_id: String,
    data: String,
}

/// Bridges the bus to a [`ComputeRuntime`].
pub struct ComputeService {
    broker: Broker,
    runtime: Arc<dyn ComputeRuntime>,
    shutdown: CancellationToken,
}

impl ComputeService {
    #[must_use]
    pub fn new(broker: Broker, runtime: Arc<dyn ComputeRuntime>) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            runtime,
            shutdown,
        }
    }

    /// Subscribe to the compute request topics and start consuming.
    ///
    /// # Errors
    ///
    /// Returns a bus error when a subscription cannot be set up.
    pub async fn start(self) -> Result<JoinHandle<()>, plexus_bus::BusError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        for topic in [Topics::VM_CREATE, Topics::VM_KILL, Topics::VM_STDIN] {
            self.broker.topic(topic).await?.subscribe(handle.clone()).await?;
        }
        info!("compute service listening");
        Ok(tokio::spawn(self.run(feed)))
    }

    async fn run(self, mut feed: SubscriberFeed) {
        let service = Arc::new(self);
        loop {
            tokio::select! {
                _ = service.shutdown.cancelled() => break,
                envelope = feed.next() => match envelope {
                    Some(envelope) => {
                        let service = service.clone();
                        tokio::spawn(async move { service.handle_request(envelope).await });
                    }
                    None => break,
                },
            }
        }
        info!("compute service stopped");
    }

    async fn handle_request(&self, envelope: Envelope) {
        debug!(topic = %envelope.topic, id = %envelope.id, "compute request");
        match envelope.topic.as_str() {
            Topics::VM_CREATE => self.handle_create(&envelope).await,
            Topics::VM_KILL => self.handle_kill(&envelope).await,
            Topics::VM_STDIN => self.handle_stdin(&envelope).await,
            other => warn!(topic = %other, "compute service received unexpected topic"),
        }
    }

    async fn handle_create(&self, request: &Envelope) {
        let payload: CreateRequest = match request.payload_as() {
            Ok(payload) => payload,
            Err(err) => {
                self.reply_error(request, &err.to_string()).await;
                return;
            }
        };
        let wasm = match BASE64.decode(&payload.wasm_base64) {
            Ok(wasm) => wasm,
            Err(err) => {
                self.reply_error(request, &format!("failed to decode wasm binary: {err}"))
                    .await;
                return;
            }
        };
        match self.runtime.create(wasm).await {
            Ok(instance_id) => {
                info!(instance_id = %instance_id, "instance started");
                self.reply(request, Topics::VM_STARTED, json!({"instanceId": instance_id}))
                    .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_kill(&self, request: &Envelope) {
        let payload: InstanceRequest = match request.payload_as() {
            Ok(payload) => payload,
            Err(err) => {
                self.reply_error(request, &err.to_string()).await;
                return;
            }
        };
        match self.runtime.kill(&payload.instance_id).await {
            Ok(()) => {
                info!(instance_id = %payload.instance_id, "instance killed");
                self.reply(
                    request,
                    Topics::VM_KILLED,
                    json!({"instanceId": payload.instance_id}),
                )
                .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_stdin(&self, request: &Envelope) {
        let payload: StdinRequest = match request.payload_as() {
            Ok(payload) => payload,
            Err(err) => {
                self.reply_error(request, &err.to_string()).await;
                return;
            }
        };
        if let Err(err) = self
            .runtime
            .stdin(&payload.instance_id, payload.data.as_bytes())
            .await
        {
            self.reply_error(request, &err.to_string()).await;
        }
    }

    async fn reply(&self, request: &Envelope, topic: &str, payload: serde_json::Value) {
        let reply = request.reply(topic, "vm_event").with_payload(payload);
        if let Err(err) = self.broker.publish(reply).await {
            warn!(error = %err, "failed to publish vm event");
        }
    }

    async fn reply_error(&self, request: &Envelope, message: &str) {
        warn!(topic = %request.topic, error = %message, "compute request failed");
        let reply = request
            .reply(error_topic(&request.topic), "error")
            .with_payload(json!({"error": message}));
        if let Err(err) = self.broker.publish(reply).await {
            warn!(error = %err, "failed to publish vm error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plexus_core::{BusConfig, ComputeError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRuntime {
        created: Mutex<Vec<Vec<u8>>>,
        killed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ComputeRuntime for RecordingRuntime {
        async fn create(&self, wasm: Vec<u8>) -> Result<String, ComputeError> {
            self.created.lock().unwrap().push(wasm);
            Ok("vm-1".to_string())
        }

        async fn kill(&self, instance_id: &str) -> Result<(), ComputeError> {
            self.killed.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }

        async fn stdin(&self, instance_id: &str, _data: &[u8]) -> Result<(), ComputeError> {
            Err(ComputeError::InstanceNotFound(instance_id.to_string()))
        }
    }

    async fn wait_for(probe: &mut SubscriberFeed, topic: &str) -> Envelope {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let envelope = probe.next().await.expect("probe closed");
                if envelope.topic == topic {
                    return envelope;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {topic}"))
    }

    #[tokio::test]
    async fn create_decodes_wasm_and_reports_started() {
        let broker = Broker::new(BusConfig::default());
        let runtime = Arc::new(RecordingRuntime::default());

        let (probe_handle, mut probe) = Subscriber::channel(16);
        for topic in [Topics::VM_STARTED, "vm:create:error"] {
            broker
                .topic(topic)
                .await
                .unwrap()
                .subscribe(probe_handle.clone())
                .await
                .unwrap();
        }
        ComputeService::new(broker.clone(), runtime.clone())
            .start()
            .await
            .unwrap();

        broker
            .publish(Envelope::new(Topics::VM_CREATE, "request").with_payload(json!({
                "wasmBase64": BASE64.encode(b"\0asm")
            })))
            .await
            .unwrap();

        let started = wait_for(&mut probe, Topics::VM_STARTED).await;
        assert_eq!(started.payload["instanceId"], json!("vm-1"));
        assert_eq!(runtime.created.lock().unwrap()[0], b"\0asm");
    }

    #[tokio::test]
    async fn bad_base64_surfaces_on_error_topic() {
        let broker = Broker::new(BusConfig::default());
        let (probe_handle, mut probe) = Subscriber::channel(16);
        broker
            .topic("vm:create:error")
            .await
            .unwrap()
            .subscribe(probe_handle)
            .await
            .unwrap();
        ComputeService::new(broker.clone(), Arc::new(RecordingRuntime::default()))
            .start()
            .await
            .unwrap();

        broker
            .publish(
                Envelope::new(Topics::VM_CREATE, "request")
                    .with_payload(json!({"wasmBase64": "!!not-base64!!"})),
            )
            .await
            .unwrap();

        let error = wait_for(&mut probe, "vm:create:error").await;
        assert!(error.payload["error"]
            .as_str()
            .unwrap()
            .contains("failed to decode wasm binary"));
    }
}
