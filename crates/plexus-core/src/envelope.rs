//! The envelope wire format.
//!
//! Every message crossing the bus is an [`Envelope`]. The broker never looks
//! inside `payload`; components deserialize it exactly once at their ingress
//! boundary into one of the typed payloads in [`crate::payload`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EnvelopeError;
use crate::id::new_id;

/// Content type used for structured payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// The core message exchanged across the Plexus broker.
///
/// `payload` and `meta` stay as raw JSON values so that routing never forces
/// a parse; round-tripping an envelope through [`Envelope::to_bytes`] and
/// [`Envelope::from_slice`] preserves both verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(topic: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            topic: topic.into(),
            kind: kind.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            payload: Value::Null,
            meta: Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach a JSON payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach meta.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Build a reply on `topic`, echoing this envelope's meta.
    ///
    /// The reply carries a fresh id; `meta.correlationId` is set to this
    /// envelope's id when the echoed meta does not already carry one, so
    /// clients can match responses to the request they sent.
    #[must_use]
    pub fn reply(&self, topic: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut meta = EnvelopeMeta::from_value(&self.meta);
        if meta.correlation_id.is_none() {
            meta.correlation_id = Some(self.id.clone());
        }
        Envelope::new(topic, kind).with_meta(meta.merged_into(&self.meta))
    }

    /// Deserialize the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Parse the conventional meta mapping. Lenient: anything that is not an
    /// object yields the default (empty) meta.
    #[must_use]
    pub fn meta_view(&self) -> EnvelopeMeta {
        EnvelopeMeta::from_value(&self.meta)
    }

    /// Encode to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] on serialization failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when the bytes are not a valid
    /// envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Typed view of the conventional `meta` mapping.
///
/// Meta stays opaque on the wire; this struct reads the well-known keys and
/// writes them back without disturbing any others a publisher may have set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl EnvelopeMeta {
    /// Read the well-known keys out of a raw meta value.
    #[must_use]
    pub fn from_value(meta: &Value) -> Self {
        serde_json::from_value(meta.clone()).unwrap_or_default()
    }

    /// Serialize to a raw meta value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Overlay the well-known keys onto `base`, keeping unknown keys intact.
    #[must_use]
    pub fn merged_into(&self, base: &Value) -> Value {
        let mut merged = match base {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(own) = self.to_value() {
            for (k, v) in own {
                merged.insert(k, v);
            }
        }
        Value::Object(merged)
    }
}
