//! Telemetry sensor.
//!
//! Watches `telemetry.vfs` and fires autonomous summarization requests when
//! a code file is read successfully. This is the only component that may
//! originate task graphs on its own.

use std::path::Path;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{Envelope, EnvelopeMeta, SensorConfig, SensorEvent, Topics, VfsEvent};

use crate::error::OrchestratorError;

/// Heuristic engine over sensor events.
pub struct TelemetrySensor {
    broker: Broker,
    config: SensorConfig,
    shutdown: CancellationToken,
}

impl TelemetrySensor {
    #[must_use]
    pub fn new(broker: Broker, config: SensorConfig) -> Self {
        let shutdown = broker.cancellation_token();
        Self {
            broker,
            config,
            shutdown,
        }
    }

    /// Subscribe to the telemetry feed and start consuming.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscription cannot be set up.
    pub async fn start(self) -> Result<JoinHandle<()>, OrchestratorError> {
        let (handle, feed) = Subscriber::channel(self.broker.queue_capacity());
        self.broker
            .topic(Topics::TELEMETRY_VFS)
            .await?
            .subscribe(handle)
            .await?;
        info!("telemetry sensor listening");
        Ok(tokio::spawn(self.run(feed)))
    }

    async fn run(self, mut feed: SubscriberFeed) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = feed.next() => match envelope {
                    Some(envelope) => self.handle_event(&envelope).await,
                    None => break,
                },
            }
        }
        info!("telemetry sensor stopped");
    }

    async fn handle_event(&self, envelope: &Envelope) {
        let event: SensorEvent = match envelope.payload_as() {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "invalid sensor event");
                return;
            }
        };
        let vfs: VfsEvent = match serde_json::from_value(event.payload) {
            Ok(vfs) => vfs,
            Err(err) => {
                warn!(error = %err, "invalid vfs event payload");
                return;
            }
        };

        if vfs.operation == "read" && vfs.success && self.is_code_file(&vfs.path) {
            info!(path = %vfs.path, "autonomous summarization triggered");
            self.trigger_summarization(&vfs.path).await;
        } else {
            debug!(operation = %vfs.operation, path = %vfs.path, "no heuristic matched");
        }
    }

    fn is_code_file(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.config.code_extensions.iter().any(|e| e == ext))
    }

    async fn trigger_summarization(&self, path: &str) {
        let prompt = format!("Summarize the code in the file '{path}'");
        let envelope = Envelope::new(Topics::AI_AGENT, "autonomous_request")
            .with_payload(json!({"prompt": prompt}))
            .with_meta(
                EnvelopeMeta {
                    source: Some("telemetry-sensor".to_string()),
                    // Autonomous graphs run as the sensor's own principal;
                    // deployments grant it read access via a manifest.
                    app_id: Some("telemetry-sensor".to_string()),
                    ..EnvelopeMeta::default()
                }
                .to_value(),
            );
        if let Err(err) = self.broker.publish(envelope).await {
            warn!(error = %err, "failed to publish summarization request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::BusConfig;

    fn sensor() -> TelemetrySensor {
        TelemetrySensor::new(Broker::new(BusConfig::default()), SensorConfig::default())
    }

    #[test]
    fn recognizes_configured_extensions() {
        let sensor = sensor();
        assert!(sensor.is_code_file("/src/main.rs"));
        assert!(sensor.is_code_file("/web/app.tsx"));
        assert!(!sensor.is_code_file("/notes/readme.md"));
        assert!(!sensor.is_code_file("/bin/data"));
    }
}
