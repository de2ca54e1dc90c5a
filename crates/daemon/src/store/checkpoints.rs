// Per-document checkpoints kept in a sidecar directory next to the document:
//
//   <dir>/<checkpoint_dir>/<name>/manifest.json   ordered {id, last_modified}
//   <dir>/<checkpoint_dir>/<name>/<id>.snap       raw document bytes

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nbstore_common::path::VirtualPath;
use nbstore_common::types::CheckpointModel;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::atomic;
use super::documents::{document_metadata, read_document_bytes, ContentsStore, Resolved};
use super::error::{StorageContext, StoreError, StoreResult};
use crate::config::StoreConfig;

const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_EXTENSION: &str = "snap";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    checkpoints: Vec<CheckpointModel>,
}

/// Creates, lists, restores and deletes checkpoints of documents in a
/// [`ContentsStore`]. Obtained via [`ContentsStore::checkpoints`].
#[derive(Clone)]
pub struct CheckpointManager {
    store: ContentsStore,
}

impl CheckpointManager {
    pub(crate) fn new(store: ContentsStore) -> Self {
        Self { store }
    }

    /// Snapshot the document's current bytes. Evicts the oldest checkpoints
    /// once more than `max_checkpoints` exist.
    pub async fn create(&self, dir: &VirtualPath, name: &str) -> StoreResult<CheckpointModel> {
        let doc = self.store.resolve(dir, name).await?;
        let _scope = self.store.entry_locks().write(&doc.file).await;

        let bytes = read_document_bytes(&doc).await?;
        let modified = document_metadata(&doc)
            .await?
            .modified()
            .storage_context(|| format!("reading modification time of `{}`", doc.display()))?;

        let sidecar = sidecar_dir(self.store.config(), &doc);
        fs::create_dir_all(&sidecar)
            .await
            .storage_context(|| format!("creating checkpoint directory for `{}`", doc.display()))?;

        let checkpoint = CheckpointModel {
            id: Uuid::new_v4().to_string(),
            last_modified: DateTime::<Utc>::from(modified),
        };
        atomic::replace(&snapshot_path(&sidecar, &checkpoint.id), &bytes)
            .await
            .storage_context(|| format!("writing checkpoint of `{}`", doc.display()))?;

        let mut manifest = load_manifest(&sidecar).await?;
        manifest.checkpoints.push(checkpoint.clone());
        let max = self.store.config().max_checkpoints;
        let excess = manifest.checkpoints.len().saturating_sub(max);
        let evicted: Vec<CheckpointModel> = manifest.checkpoints.drain(..excess).collect();
        store_manifest(&sidecar, &manifest).await?;

        for old in &evicted {
            warn!(path = %doc.display(), checkpoint = %old.id, max, "evicting oldest checkpoint");
            remove_snapshot(&sidecar, &old.id).await;
        }

        info!(path = %doc.display(), checkpoint = %checkpoint.id, "created checkpoint");
        Ok(checkpoint)
    }

    /// Checkpoints of a document in creation order.
    pub async fn list(&self, dir: &VirtualPath, name: &str) -> StoreResult<Vec<CheckpointModel>> {
        let doc = self.store.resolve(dir, name).await?;
        let _scope = self.store.entry_locks().read(&doc.file).await;

        document_metadata(&doc).await?;
        let manifest = load_manifest(&sidecar_dir(self.store.config(), &doc)).await?;
        debug!(path = %doc.display(), count = manifest.checkpoints.len(), "listed checkpoints");
        Ok(manifest.checkpoints)
    }

    /// Overwrite the document with a checkpoint's bytes. The checkpoint is kept.
    pub async fn restore(&self, dir: &VirtualPath, name: &str, id: &str) -> StoreResult<()> {
        let doc = self.store.resolve(dir, name).await?;
        let _scope = self.store.entry_locks().write(&doc.file).await;

        document_metadata(&doc).await?;
        let sidecar = sidecar_dir(self.store.config(), &doc);
        let checkpoint = find(&load_manifest(&sidecar).await?, &doc, id)?;

        let bytes = match fs::read(snapshot_path(&sidecar, &checkpoint.id)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::not_found("checkpoint", id));
            }
            Err(error) => {
                return Err(StoreError::Storage {
                    context: format!("reading checkpoint `{id}` of `{}`", doc.display()),
                    source: error,
                })
            }
        };
        atomic::replace(&doc.file, &bytes)
            .await
            .storage_context(|| format!("restoring `{}`", doc.display()))?;

        info!(path = %doc.display(), checkpoint = %checkpoint.id, "restored checkpoint");
        Ok(())
    }

    pub async fn delete(&self, dir: &VirtualPath, name: &str, id: &str) -> StoreResult<()> {
        let doc = self.store.resolve(dir, name).await?;
        let _scope = self.store.entry_locks().write(&doc.file).await;

        document_metadata(&doc).await?;
        let sidecar = sidecar_dir(self.store.config(), &doc);
        let mut manifest = load_manifest(&sidecar).await?;
        let checkpoint = find(&manifest, &doc, id)?;
        manifest.checkpoints.retain(|c| c.id != checkpoint.id);
        store_manifest(&sidecar, &manifest).await?;
        remove_snapshot(&sidecar, &checkpoint.id).await;

        info!(path = %doc.display(), checkpoint = %checkpoint.id, "deleted checkpoint");
        Ok(())
    }
}

/// Remove every checkpoint of `doc`. The caller holds its write scope.
pub(crate) async fn drop_all(config: &StoreConfig, doc: &Resolved) -> StoreResult<()> {
    let sidecar = sidecar_dir(config, doc);
    match fs::remove_dir_all(&sidecar).await {
        Ok(()) => {
            debug!(path = %doc.display(), "dropped checkpoints");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(StoreError::Storage {
            context: format!("dropping checkpoints of `{}`", doc.display()),
            source: error,
        }),
    }
}

fn sidecar_dir(config: &StoreConfig, doc: &Resolved) -> PathBuf {
    doc.dir_path.join(&config.checkpoint_dir).join(&doc.name)
}

fn snapshot_path(sidecar: &Path, id: &str) -> PathBuf {
    sidecar.join(format!("{id}.{SNAPSHOT_EXTENSION}"))
}

fn find(manifest: &Manifest, doc: &Resolved, id: &str) -> StoreResult<CheckpointModel> {
    manifest
        .checkpoints
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .ok_or_else(|| StoreError::not_found("checkpoint", format!("{}@{id}", doc.display())))
}

async fn load_manifest(sidecar: &Path) -> StoreResult<Manifest> {
    let path = sidecar.join(MANIFEST_FILE);
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Manifest::default()),
        Err(error) => {
            return Err(StoreError::Storage {
                context: format!("reading `{}`", path.display()),
                source: error,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Storage {
        context: format!("parsing `{}`", path.display()),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })
}

async fn store_manifest(sidecar: &Path, manifest: &Manifest) -> StoreResult<()> {
    let path = sidecar.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(manifest).map_err(|e| StoreError::Storage {
        context: format!("serializing `{}`", path.display()),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;
    atomic::replace(&path, &bytes)
        .await
        .storage_context(|| format!("writing `{}`", path.display()))
}

async fn remove_snapshot(sidecar: &Path, id: &str) {
    let path = snapshot_path(sidecar, id);
    if let Err(error) = fs::remove_file(&path).await {
        if error.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %error, "failed to remove checkpoint snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use nbstore_common::types::DocumentContent;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(max_checkpoints: usize) -> (TempDir, ContentsStore) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("foo")).unwrap();
        let mut config = StoreConfig::with_root(tmp.path());
        config.max_checkpoints = max_checkpoints;
        (tmp, ContentsStore::open(config).unwrap())
    }

    fn foo() -> VirtualPath {
        VirtualPath::parse("foo").unwrap()
    }

    fn notebook(marker: &str) -> DocumentContent {
        DocumentContent::json(json!({ "metadata": { "name": marker }, "cells": [marker] }))
    }

    #[tokio::test]
    async fn create_and_list_in_creation_order() {
        let (tmp, store) = setup(10);
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        let checkpoints = store.checkpoints();

        assert!(checkpoints.list(&foo(), "a.ipynb").await.unwrap().is_empty());
        let first = checkpoints.create(&foo(), "a.ipynb").await.unwrap();
        let second = checkpoints.create(&foo(), "a.ipynb").await.unwrap();

        let listed = checkpoints.list(&foo(), "a.ipynb").await.unwrap();
        assert_eq!(listed, vec![first.clone(), second]);

        let sidecar = tmp.path().join("foo/.ipynb_checkpoints/a.ipynb");
        assert!(sidecar.join(MANIFEST_FILE).is_file());
        assert!(sidecar.join(format!("{}.snap", first.id)).is_file());
    }

    #[tokio::test]
    async fn oldest_checkpoint_is_evicted() {
        let (tmp, store) = setup(3);
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        let checkpoints = store.checkpoints();

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(checkpoints.create(&foo(), "a.ipynb").await.unwrap());
        }

        let listed = checkpoints.list(&foo(), "a.ipynb").await.unwrap();
        assert_eq!(listed, created[1..].to_vec());
        let sidecar = tmp.path().join("foo/.ipynb_checkpoints/a.ipynb");
        assert!(!sidecar.join(format!("{}.snap", created[0].id)).exists());
    }

    #[tokio::test]
    async fn restore_brings_back_snapshot_and_bumps_timestamp() {
        let (_tmp, store) = setup(10);
        store.create(&foo(), Some("a.ipynb"), Some(notebook("before"))).await.unwrap();
        let checkpoints = store.checkpoints();
        let checkpoint = checkpoints.create(&foo(), "a.ipynb").await.unwrap();

        store.save(&foo(), "a.ipynb", notebook("after"), None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        checkpoints.restore(&foo(), "a.ipynb", &checkpoint.id).await.unwrap();

        let doc = store.read(&foo(), "a.ipynb").await.unwrap();
        assert_eq!(doc.content(), Some(notebook("before")));
        assert!(doc.last_modified > checkpoint.last_modified);
        assert_eq!(checkpoints.list(&foo(), "a.ipynb").await.unwrap(), vec![checkpoint]);
    }

    #[tokio::test]
    async fn unknown_ids_and_documents_are_not_found() {
        let (_tmp, store) = setup(10);
        let checkpoints = store.checkpoints();
        assert!(checkpoints.create(&foo(), "q.ipynb").await.unwrap_err().is_not_found());
        assert!(checkpoints.list(&foo(), "q.ipynb").await.unwrap_err().is_not_found());

        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        assert!(checkpoints.restore(&foo(), "a.ipynb", "nope").await.unwrap_err().is_not_found());
        assert!(checkpoints.delete(&foo(), "a.ipynb", "nope").await.unwrap_err().is_not_found());
        assert!(checkpoints
            .restore(&foo(), "a.ipynb", "../../a.ipynb")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_single_checkpoint() {
        let (_tmp, store) = setup(10);
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        let checkpoints = store.checkpoints();
        let first = checkpoints.create(&foo(), "a.ipynb").await.unwrap();
        let second = checkpoints.create(&foo(), "a.ipynb").await.unwrap();

        checkpoints.delete(&foo(), "a.ipynb", &first.id).await.unwrap();
        assert_eq!(checkpoints.list(&foo(), "a.ipynb").await.unwrap(), vec![second]);
        assert!(checkpoints.delete(&foo(), "a.ipynb", &first.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rename_and_delete_invalidate_checkpoints() {
        let (tmp, store) = setup(10);
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        let checkpoints = store.checkpoints();
        let checkpoint = checkpoints.create(&foo(), "a.ipynb").await.unwrap();

        store.rename(&foo(), "a.ipynb", "b.ipynb").await.unwrap();
        assert!(checkpoints.list(&foo(), "b.ipynb").await.unwrap().is_empty());
        assert!(checkpoints
            .restore(&foo(), "a.ipynb", &checkpoint.id)
            .await
            .unwrap_err()
            .is_not_found());

        // A new document under the old name starts without checkpoints.
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        assert!(checkpoints.list(&foo(), "a.ipynb").await.unwrap().is_empty());

        checkpoints.create(&foo(), "b.ipynb").await.unwrap();
        store.delete(&foo(), "b.ipynb").await.unwrap();
        assert!(!tmp.path().join("foo/.ipynb_checkpoints/b.ipynb").exists());
        assert!(checkpoints.list(&foo(), "b.ipynb").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn checkpoint_directory_is_hidden_from_listings() {
        let (_tmp, store) = setup(10);
        store.create(&foo(), Some("a.ipynb"), None).await.unwrap();
        store.checkpoints().create(&foo(), "a.ipynb").await.unwrap();

        let names: Vec<_> = store.list(&foo()).await.unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a.ipynb"]);
    }
}
