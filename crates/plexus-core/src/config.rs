//! Configuration types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Plexus deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlexusConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl PlexusConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults. `PLEXUS_HOST`, `PLEXUS_PORT` and `PLEXUS_TOKENS`
    /// (comma-separated `token=subject` pairs) are recognized.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("PLEXUS_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PLEXUS_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(tokens) = std::env::var("PLEXUS_TOKENS") {
            for pair in tokens.split(',') {
                if let Some((token, subject)) = pair.split_once('=') {
                    config
                        .auth
                        .tokens
                        .insert(token.trim().to_string(), subject.trim().to_string());
                }
            }
        }
        config
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Broker sizing and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Envelopes replayed to each new subscriber.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// Bound of every subscriber send queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bound of each topic's command mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// How long topic mailboxes may drain on shutdown.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_len: default_history_len(),
            queue_capacity: default_queue_capacity(),
            mailbox_capacity: default_mailbox_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_history_len() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    256
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_drain_timeout_ms() -> u64 {
    2_000
}

/// WebSocket session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames above this size are rejected.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Idle read deadline, refreshed by pongs.
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    /// Interval between outbound pings. Must stay below the pong timeout.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Deadline for a single frame write.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            pong_timeout_secs: default_pong_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

fn default_max_frame_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_pong_timeout_secs() -> u64 {
    60
}

fn default_ping_interval_secs() -> u64 {
    54
}

fn default_write_timeout_secs() -> u64 {
    10
}

/// Telemetry sensor heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// File extensions treated as code for auto-summarization.
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            code_extensions: default_code_extensions(),
        }
    }
}

fn default_code_extensions() -> Vec<String> {
    ["rs", "go", "ts", "tsx", "js", "py"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Gateway authentication: a static token table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// token → principal subject.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = PlexusConfig::default();
        assert_eq!(config.bus.history_len, 100);
        assert_eq!(config.bus.queue_capacity, 256);
        assert_eq!(config.session.max_frame_bytes, 2 * 1024 * 1024);
        assert_eq!(config.session.pong_timeout_secs, 60);
        assert_eq!(config.session.ping_interval_secs, 54);
        assert_eq!(config.session.write_timeout_secs, 10);
        assert_eq!(config.bus.drain_timeout_ms, 2_000);
    }

    #[test]
    fn sensor_recognizes_rust_sources() {
        let config = SensorConfig::default();
        assert!(config.code_extensions.iter().any(|e| e == "rs"));
    }
}
