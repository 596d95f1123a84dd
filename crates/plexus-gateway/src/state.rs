//! Application state

use std::sync::Arc;

use plexus_bus::Broker;
use plexus_core::{PlexusConfig, TokenVerifier};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub config: Arc<PlexusConfig>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    #[must_use]
    pub fn new(broker: Broker, config: PlexusConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            broker,
            config: Arc::new(config),
            verifier,
        }
    }
}
