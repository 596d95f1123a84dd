//! Virtual file system service.
//!
//! Consumes `vfs:*` request topics, executes them against the object store
//! and publishes `:result` / `:error` replies. Every operation additionally
//! emits a `telemetry.vfs` sensor event, which is what the telemetry sensor
//! feeds on.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{
    error_topic, result_topic, Envelope, ObjectStore, ObjectStoreError, SensorEvent, Topics,
    VfsEvent,
};

#[derive(Deserialize)]
struct PathRequest {
    path: String,
}

#[derive(Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderRequest {
    path: String,
    name: String,
}

/// Bridges the bus to an [`ObjectStore`].
pub struct VfsService {
    broker: Broker,
    objects: Arc<dyn ObjectStore>,
    shutdown: CancellationToken,
}

impl VfsService {
    #[must_use]
    pub fn new(broker: Broker, objects: Arc<dyn ObjectStore>) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            objects,
            shutdown,
        }
    }

    /// Subscribe to the VFS request topics and start consuming.
    ///
    /// # Errors
    ///
    /// Returns a bus error when a subscription cannot be set up.
    pub async fn start(self) -> Result<JoinHandle<()>, plexus_bus::BusError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        for topic in [
            Topics::VFS_READ,
            Topics::VFS_WRITE,
            Topics::VFS_LIST,
            Topics::VFS_DELETE,
            Topics::VFS_CREATE_FOLDER,
        ] {
            self.broker.topic(topic).await?.subscribe(handle.clone()).await?;
        }
        info!("vfs service listening");
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
        info!("vfs service stopped");
    }

    async fn handle_request(&self, envelope: Envelope) {
        debug!(topic = %envelope.topic, id = %envelope.id, "vfs request");
        match envelope.topic.as_str() {
            Topics::VFS_READ => self.handle_read(&envelope).await,
            Topics::VFS_WRITE => self.handle_write(&envelope).await,
            Topics::VFS_LIST => self.handle_list(&envelope).await,
            Topics::VFS_DELETE => self.handle_delete(&envelope).await,
            Topics::VFS_CREATE_FOLDER => self.handle_create_folder(&envelope).await,
            other => warn!(topic = %other, "vfs service received unexpected topic"),
        }
    }

    async fn handle_read(&self, request: &Envelope) {
        let Some(payload) = self.parse::<PathRequest>(request).await else {
            return;
        };
        let outcome = self.objects.read(&payload.path).await;
        let size = outcome.as_ref().map(|d| d.len() as u64).ok();
        self.emit_telemetry("read", &payload.path, outcome.as_ref().err(), size)
            .await;
        match outcome {
            Ok(bytes) => {
                self.reply(
                    request,
                    json!({
                        "path": payload.path,
                        "content": String::from_utf8_lossy(&bytes),
                    }),
                )
                .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_write(&self, request: &Envelope) {
        let Some(payload) = self.parse::<WriteRequest>(request).await else {
            return;
        };
        let bytes = if payload.encoding.as_deref() == Some("base64") {
            match BASE64.decode(&payload.content) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.emit_telemetry(
                        "write",
                        &payload.path,
                        Some(&ObjectStoreError::InvalidPath("bad base64".to_string())),
                        None,
                    )
                    .await;
                    self.reply_error(request, "invalid base64 content").await;
                    return;
                }
            }
        } else {
            payload.content.into_bytes()
        };

        let outcome = self.objects.write(&payload.path, &bytes).await;
        self.emit_telemetry(
            "write",
            &payload.path,
            outcome.as_ref().err(),
            Some(bytes.len() as u64),
        )
        .await;
        match outcome {
            Ok(()) => {
                self.reply(request, json!({"success": true, "path": payload.path}))
                    .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_list(&self, request: &Envelope) {
        let Some(payload) = self.parse::<PathRequest>(request).await else {
            return;
        };
        let outcome = self.objects.list(&payload.path).await;
        self.emit_telemetry("list", &payload.path, outcome.as_ref().err(), None)
            .await;
        match outcome {
            Ok(files) => {
                self.reply(request, json!({"path": payload.path, "files": files}))
                    .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_delete(&self, request: &Envelope) {
        let Some(payload) = self.parse::<PathRequest>(request).await else {
            return;
        };
        let outcome = self.objects.delete(&payload.path).await;
        self.emit_telemetry("delete", &payload.path, outcome.as_ref().err(), None)
            .await;
        match outcome {
            Ok(()) => {
                self.reply(request, json!({"success": true, "path": payload.path}))
                    .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn handle_create_folder(&self, request: &Envelope) {
        let Some(payload) = self.parse::<CreateFolderRequest>(request).await else {
            return;
        };
        let outcome = self.objects.create_dir(&payload.path, &payload.name).await;
        self.emit_telemetry("create_folder", &payload.path, outcome.as_ref().err(), None)
            .await;
        match outcome {
            Ok(()) => {
                self.reply(request, json!({"success": true, "path": payload.path}))
                    .await;
            }
            Err(err) => self.reply_error(request, &err.to_string()).await,
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(&self, request: &Envelope) -> Option<T> {
        match request.payload_as::<T>() {
            Ok(payload) => Some(payload),
            Err(err) => {
                self.reply_error(request, &err.to_string()).await;
                None
            }
        }
    }

    async fn reply(&self, request: &Envelope, payload: serde_json::Value) {
        let reply = request
            .reply(result_topic(&request.topic), "vfs_response")
            .with_payload(payload);
        if let Err(err) = self.broker.publish(reply).await {
            warn!(error = %err, "failed to publish vfs response");
        }
    }

    async fn reply_error(&self, request: &Envelope, message: &str) {
        warn!(topic = %request.topic, error = %message, "vfs request failed");
        let reply = request
            .reply(error_topic(&request.topic), "error")
            .with_payload(json!({"error": message}));
        if let Err(err) = self.broker.publish(reply).await {
            warn!(error = %err, "failed to publish vfs error");
        }
    }

    async fn emit_telemetry(
        &self,
        operation: &str,
        path: &str,
        error: Option<&ObjectStoreError>,
        size: Option<u64>,
    ) {
        let event = SensorEvent {
            kind: "vfs".to_string(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(VfsEvent {
                operation: operation.to_string(),
                path: path.to_string(),
                success: error.is_none(),
                error: error.map(ToString::to_string),
                size,
            })
            .unwrap_or_default(),
        };
        let envelope = Envelope::new(Topics::TELEMETRY_VFS, "sensor_event")
            .with_payload(serde_json::to_value(&event).unwrap_or_default());
        if let Err(err) = self.broker.publish(envelope).await {
            warn!(error = %err, "failed to publish telemetry event");
        }
    }
}
