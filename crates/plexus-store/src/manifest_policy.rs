//! App-manifest policy store.
//!
//! Apps declare their capabilities in `manifest.json` files; the store walks
//! a root directory once at startup and answers permission checks from the
//! loaded set. No manifest means no permissions.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use plexus_core::{Permission, PolicyStore};

use crate::error::PolicyError;

/// The `manifest.json` schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// [`PolicyStore`] backed by loaded manifests.
#[derive(Default)]
pub struct ManifestPolicyStore {
    manifests: HashMap<String, AppManifest>,
}

impl ManifestPolicyStore {
    /// Build from an explicit manifest list.
    #[must_use]
    pub fn from_manifests(manifests: impl IntoIterator<Item = AppManifest>) -> Self {
        Self {
            manifests: manifests
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
        }
    }

    /// Walk `root` for `manifest.json` files and load them. A manifest that
    /// fails to read or parse is skipped with a warning; the rest still load.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Io`] only when the root itself cannot be
    /// walked.
    pub fn load(root: &Path) -> Result<Self, PolicyError> {
        let mut store = Self::default();
        store.walk(root)?;
        Ok(store)
    }

    fn walk(&mut self, dir: &Path) -> Result<(), PolicyError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path)?;
            } else if path.file_name().is_some_and(|n| n == "manifest.json") {
                self.load_manifest(&path);
            }
        }
        Ok(())
    }

    fn load_manifest(&mut self, path: &Path) {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read manifest");
                return;
            }
        };
        let manifest: AppManifest = match serde_json::from_slice(&data) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not parse manifest");
                return;
            }
        };
        if manifest.id.is_empty() {
            warn!(path = %path.display(), "manifest is missing an id");
            return;
        }
        debug!(app_id = %manifest.id, "loaded manifest");
        self.manifests.insert(manifest.id.clone(), manifest);
    }

    /// All permissions declared by an app.
    #[must_use]
    pub fn permissions(&self, app_id: &str) -> &[String] {
        self.manifests
            .get(app_id)
            .map(|m| m.permissions.as_slice())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PolicyStore for ManifestPolicyStore {
    async fn has_permission(&self, app_id: &str, permission: Permission) -> bool {
        let Some(manifest) = self.manifests.get(app_id) else {
            debug!(app_id = %app_id, "permission check failed: no manifest");
            return false;
        };
        manifest
            .permissions
            .iter()
            .any(|p| p == permission.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, permissions: &[&str]) -> AppManifest {
        AppManifest {
            id: id.to_string(),
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn grants_declared_permission() {
        let store =
            ManifestPolicyStore::from_manifests([manifest("editor", &["filesystem_read"])]);
        assert!(store.has_permission("editor", Permission::FilesystemRead).await);
        assert!(!store.has_permission("editor", Permission::FilesystemWrite).await);
    }

    #[tokio::test]
    async fn unknown_app_holds_nothing() {
        let store = ManifestPolicyStore::default();
        assert!(!store.has_permission("ghost", Permission::VmRun).await);
    }

    #[tokio::test]
    async fn loads_manifests_from_directory_tree() {
        let root = tempfile::tempdir().unwrap();
        let app_dir = root.path().join("apps/editor");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(
            app_dir.join("manifest.json"),
            r#"{"id": "editor", "permissions": ["filesystem_read", "vm_run"]}"#,
        )
        .unwrap();
        // a broken manifest elsewhere must not poison the load
        let broken_dir = root.path().join("apps/broken");
        fs::create_dir_all(&broken_dir).unwrap();
        fs::write(broken_dir.join("manifest.json"), b"{not json").unwrap();

        let store = ManifestPolicyStore::load(root.path()).unwrap();
        assert!(store.has_permission("editor", Permission::VmRun).await);
        assert_eq!(store.permissions("editor").len(), 2);
        assert!(store.permissions("broken").is_empty());
    }
}
