//! Filesystem-backed source store.
//!
//! Reads a checked-out desired-state repository: every `.json` file
//! under the application's path is one resource descriptor. The
//! revision is the canonical content hash of the whole tree, so an
//! unchanged checkout always resolves to the same revision and history
//! is append-only by construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drift_diff::tree_revision;
use drift_model::{DesiredTree, ResourceDescriptor, ResourceId, ResourceKind, Revision, SourceRef};
use serde::Deserialize;
use tracing::debug;

use super::{SourceError, SourceStore};

/// One manifest file on disk.
#[derive(Debug, Deserialize)]
struct ManifestFile {
    kind: String,
    namespace: String,
    name: String,
    spec: serde_json::Value,
}

/// Source store over a local checkout of the desired-state repository.
pub struct FsSourceStore {
    root: PathBuf,
}

impl FsSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn app_dir(&self, source: &SourceRef) -> PathBuf {
        self.root.join(&source.repo).join(&source.path)
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn fetch(&self, source: &SourceRef) -> Result<(Revision, DesiredTree), SourceError> {
        let dir = self.app_dir(source);

        let files = collect_manifest_paths(&dir).await?;
        let mut resources = BTreeMap::new();

        for path in files {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| SourceError::SourceUnreachable(format!("{}: {e}", path.display())))?;

            let manifest: ManifestFile =
                serde_json::from_slice(&bytes).map_err(|e| SourceError::InvalidManifest {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

            let kind: ResourceKind =
                manifest
                    .kind
                    .parse()
                    .map_err(|e: drift_model::UnknownKind| SourceError::InvalidManifest {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?;

            let id = ResourceId::new(kind, manifest.namespace, manifest.name);
            if resources.contains_key(&id) {
                return Err(SourceError::InvalidManifest {
                    path: path.display().to_string(),
                    message: format!("duplicate resource identity {id}"),
                });
            }
            resources.insert(id.clone(), ResourceDescriptor::new(id, manifest.spec));
        }

        let revision = tree_revision(resources.iter().map(|(id, d)| (id, &d.spec)));

        // A pinned target must match the checkout; otherwise the tracked
        // revision does not resolve here.
        if let Some(target) = &source.target {
            if !revision.as_str().contains(target.trim_start_matches("sha256:")) {
                return Err(SourceError::RevisionNotFound(target.clone()));
            }
        }

        debug!(
            revision = %revision.short(),
            resources = resources.len(),
            path = %dir.display(),
            "Fetched desired tree"
        );

        let tree = DesiredTree::new(revision.clone(), resources);
        Ok((revision, tree))
    }
}

/// Collect manifest file paths under `dir`, recursively, in stable order.
async fn collect_manifest_paths(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await.map_err(|e| {
            SourceError::SourceUnreachable(format!("{}: {e}", current.display()))
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            SourceError::SourceUnreachable(format!("{}: {e}", current.display()))
        })? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| {
                SourceError::SourceUnreachable(format!("{}: {e}", path.display()))
            })?;

            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(repo: &str, path: &str) -> SourceRef {
        SourceRef {
            repo: repo.to_string(),
            path: path.to_string(),
            target: None,
        }
    }

    fn write_manifest(dir: &Path, file: &str, kind: &str, name: &str, spec: serde_json::Value) {
        let body = serde_json::json!({
            "kind": kind,
            "namespace": "prod",
            "name": name,
            "spec": spec,
        });
        std::fs::write(dir.join(file), serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_reads_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let app_dir = tmp.path().join("repo/apps/api");
        std::fs::create_dir_all(&app_dir).unwrap();
        write_manifest(&app_dir, "workload.json", "workload", "api", serde_json::json!({"replicas": 2}));
        write_manifest(&app_dir, "config.json", "config_map", "settings", serde_json::json!({"k": "v"}));

        let store = FsSourceStore::new(tmp.path());
        let (revision, tree) = store.fetch(&source("repo", "apps/api")).await.unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.revision(), &revision);
    }

    #[tokio::test]
    async fn test_revision_stable_across_fetches() {
        let tmp = tempfile::tempdir().unwrap();
        let app_dir = tmp.path().join("repo/apps/api");
        std::fs::create_dir_all(&app_dir).unwrap();
        write_manifest(&app_dir, "workload.json", "workload", "api", serde_json::json!({"replicas": 2}));

        let store = FsSourceStore::new(tmp.path());
        let (rev1, _) = store.fetch(&source("repo", "apps/api")).await.unwrap();
        let (rev2, _) = store.fetch(&source("repo", "apps/api")).await.unwrap();
        assert_eq!(rev1, rev2);

        write_manifest(&app_dir, "workload.json", "workload", "api", serde_json::json!({"replicas": 3}));
        let (rev3, _) = store.fetch(&source("repo", "apps/api")).await.unwrap();
        assert_ne!(rev1, rev3);
    }

    #[tokio::test]
    async fn test_missing_dir_is_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(tmp.path());
        let err = store.fetch(&source("repo", "missing")).await.unwrap_err();
        assert!(matches!(err, SourceError::SourceUnreachable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let app_dir = tmp.path().join("repo/apps/api");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("broken.json"), b"{ not json").unwrap();

        let store = FsSourceStore::new(tmp.path());
        let err = store.fetch(&source("repo", "apps/api")).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidManifest { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_pinned_target_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let app_dir = tmp.path().join("repo/apps/api");
        std::fs::create_dir_all(&app_dir).unwrap();
        write_manifest(&app_dir, "workload.json", "workload", "api", serde_json::json!({"replicas": 2}));

        let store = FsSourceStore::new(tmp.path());
        let pinned = SourceRef {
            repo: "repo".to_string(),
            path: "apps/api".to_string(),
            target: Some("sha256:0000000000".to_string()),
        };
        let err = store.fetch(&pinned).await.unwrap_err();
        assert!(matches!(err, SourceError::RevisionNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let app_dir = tmp.path().join("repo/apps/api");
        std::fs::create_dir_all(&app_dir).unwrap();
        write_manifest(&app_dir, "a.json", "workload", "api", serde_json::json!({"replicas": 1}));
        write_manifest(&app_dir, "b.json", "workload", "api", serde_json::json!({"replicas": 2}));

        let store = FsSourceStore::new(tmp.path());
        let err = store.fetch(&source("repo", "apps/api")).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidManifest { .. }));
    }
}
