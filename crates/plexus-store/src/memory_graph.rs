//! In-memory graph store.
//!
//! Each graph sits behind its own async mutex, which is exactly the
//! serializable-per-graph transaction the orchestrator relies on: two
//! updates to the same graph never interleave, updates to different graphs
//! run in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use plexus_core::{GraphStore, GraphUpdate, StoreError, TaskGraph};

type Slot = Arc<Mutex<TaskGraph>>;

/// Memory-backed [`GraphStore`].
#[derive(Default)]
pub struct MemoryGraphStore {
    graphs: Mutex<HashMap<String, Slot>>,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, graph_id: &str) -> Result<Slot, StoreError> {
        let graphs = self.graphs.lock().await;
        graphs
            .get(graph_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(graph_id.to_string()))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn put(&self, graph: &TaskGraph) -> Result<(), StoreError> {
        let mut graphs = self.graphs.lock().await;
        match graphs.get(&graph.id) {
            Some(slot) => *slot.lock().await = graph.clone(),
            None => {
                graphs.insert(graph.id.clone(), Arc::new(Mutex::new(graph.clone())));
            }
        }
        Ok(())
    }

    async fn get(&self, graph_id: &str) -> Result<TaskGraph, StoreError> {
        let slot = self.slot(graph_id).await?;
        let graph = slot.lock().await;
        Ok(graph.clone())
    }

    async fn update(&self, graph_id: &str, apply: GraphUpdate) -> Result<TaskGraph, StoreError> {
        let slot = self.slot(graph_id).await?;
        let mut graph = slot.lock().await;
        // Mutate a copy so an aborted transaction leaves nothing behind.
        let mut draft = graph.clone();
        apply(&mut draft)?;
        *graph = draft;
        Ok(graph.clone())
    }

    async fn list(&self) -> Result<Vec<TaskGraph>, StoreError> {
        let slots: Vec<Slot> = {
            let graphs = self.graphs.lock().await;
            graphs.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        Ok(out)
    }
}
