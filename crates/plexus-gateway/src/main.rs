//! Plexus kernel: message broker, agent orchestrator and gateway in one
//! process.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plexus_bus::Broker;
use plexus_core::{AiBackend, ComputeRuntime, GraphStore, ObjectStore, PlexusConfig, PolicyStore};
use plexus_gateway::{create_router, AppState, StaticTokenVerifier};
use plexus_orchestrator::{AgentOrchestrator, GraphPlanner, TelemetrySensor, ToolExecutor};
use plexus_services::{ComputeService, UnconfiguredAi, UnconfiguredCompute, VfsService};
use plexus_store::{ManifestPolicyStore, MemoryGraphStore, MemoryObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("starting Plexus kernel v{}", env!("CARGO_PKG_VERSION"));

    let config = PlexusConfig::from_env();
    if config.auth.tokens.is_empty() {
        warn!("PLEXUS_TOKENS is not set; every gateway request will be rejected");
    }

    let broker = Broker::new(config.bus.clone());

    // Collaborators. The object and graph stores default to the in-memory
    // backends; AI and compute stay explicit "not configured" stand-ins
    // until a real backend is wired in.
    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let graphs: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
    let policy: Arc<dyn PolicyStore> = match std::env::var("PLEXUS_APPS_DIR") {
        Ok(dir) => Arc::new(ManifestPolicyStore::load(Path::new(&dir))?),
        Err(_) => {
            warn!("PLEXUS_APPS_DIR is not set; no app holds any permission");
            Arc::new(ManifestPolicyStore::default())
        }
    };
    warn!("AI backend and compute runtime are not configured");
    let ai: Arc<dyn AiBackend> = Arc::new(UnconfiguredAi);
    let runtime: Arc<dyn ComputeRuntime> = Arc::new(UnconfiguredCompute);

    // Services close the loop over the bus.
    VfsService::new(broker.clone(), objects.clone()).start().await?;
    ComputeService::new(broker.clone(), runtime).start().await?;
    ToolExecutor::new(broker.clone(), objects, ai.clone(), policy)
        .start()
        .await?;
    AgentOrchestrator::new(broker.clone(), graphs).start().await?;
    GraphPlanner::new(broker.clone(), ai).start().await?;
    TelemetrySensor::new(broker.clone(), config.sensor.clone())
        .start()
        .await?;

    let verifier = Arc::new(StaticTokenVerifier::new(config.auth.tokens.clone()));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(broker.clone(), config, verifier);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Reject new publishes, drain topic mailboxes, close client queues.
    broker.shutdown().await;
    info!("Plexus kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
