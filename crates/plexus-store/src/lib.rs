//! # plexus-store
//!
//! Reference implementations of the Plexus persistence traits:
//! an in-memory [`MemoryGraphStore`] with per-graph serializable
//! transactions, an in-memory [`MemoryObjectStore`] for the virtual file
//! system, and a [`ManifestPolicyStore`] that loads app permissions from
//! `manifest.json` files.

mod error;
mod manifest_policy;
mod memory_graph;
mod memory_object;

pub use error::PolicyError;
pub use manifest_policy::{AppManifest, ManifestPolicyStore};
pub use memory_graph::MemoryGraphStore;
pub use memory_object::MemoryObjectStore;
