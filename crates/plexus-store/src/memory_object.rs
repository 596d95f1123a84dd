//! In-memory object store for the virtual file system.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use plexus_core::{FileInfo, ObjectStore, ObjectStoreError};

#[derive(Clone)]
enum Entry {
    File {
        data: Vec<u8>,
        modified_at: DateTime<Utc>,
    },
    Dir,
}

/// Memory-backed [`ObjectStore`] keyed by normalized absolute paths.
#[derive(Default)]
pub struct MemoryObjectStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> Result<String, ObjectStoreError> {
        let trimmed = path.trim_end_matches('/');
        let normalized = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        if normalized.contains("..") {
            return Err(ObjectStoreError::InvalidPath(path.to_string()));
        }
        Ok(normalized)
    }

    fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    fn base_name(path: &str) -> String {
        path.rsplit('/').next().unwrap_or_default().to_string()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = Self::normalize(path)?;
        let entries = self.entries.read().await;
        match entries.get(&path) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Dir) => Err(ObjectStoreError::InvalidPath(format!(
                "{path} is a directory"
            ))),
            None => Err(ObjectStoreError::NotFound(path)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        let path = Self::normalize(path)?;
        let mut entries = self.entries.write().await;
        entries.insert(
            path,
            Entry::File {
                data: data.to_vec(),
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, ObjectStoreError> {
        let dir = Self::normalize(path)?;
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        let entries = self.entries.read().await;
        let mut infos: Vec<FileInfo> = entries
            .iter()
            .filter(|(p, _)| {
                p.starts_with(&prefix) && !p[prefix.len()..].contains('/')
            })
            .map(|(p, entry)| match entry {
                Entry::File { data, modified_at } => FileInfo {
                    name: Self::base_name(p),
                    path: p.clone(),
                    size: data.len() as u64,
                    is_dir: false,
                    modified_at: Some(*modified_at),
                },
                Entry::Dir => FileInfo {
                    name: Self::base_name(p),
                    path: p.clone(),
                    size: 0,
                    is_dir: true,
                    modified_at: None,
                },
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        let path = Self::normalize(path)?;
        let mut entries = self.entries.write().await;
        if entries.remove(&path).is_none() {
            return Err(ObjectStoreError::NotFound(path));
        }
        // Dropping a directory takes its subtree with it.
        let prefix = format!("{path}/");
        entries.retain(|p, _| !p.starts_with(&prefix));
        Ok(())
    }

    async fn create_dir(&self, parent: &str, name: &str) -> Result<(), ObjectStoreError> {
        let parent = Self::normalize(parent)?;
        if name.is_empty() || name.contains('/') {
            return Err(ObjectStoreError::InvalidPath(name.to_string()));
        }
        let mut entries = self.entries.write().await;
        entries.insert(Self::join(&parent, name), Entry::Dir);
        Ok(())
    }
}
