// Document CRUD over a local directory tree.
//
// Every document is one file below `root_dir`; the virtual path mirrors the
// directory layout. Mutations run inside per-identity exclusive scopes and
// publish content via temp file + rename.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nbstore_common::path::{normalize_segment, VirtualPath};
use nbstore_common::types::{ContentFormat, DocumentContent, DocumentModel};
use tokio::fs;
use tracing::{debug, info, warn};

use super::atomic;
use super::checkpoints::{self, CheckpointManager};
use super::content;
use super::error::{StorageContext, StoreError, StoreResult};
use super::locks::LockTable;
use super::names::NameTemplate;
use super::walker;
use crate::config::StoreConfig;

/// How many times allocation is retried after losing a race to another writer.
const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// A validated (directory, name) identity mapped onto storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub dir: VirtualPath,
    pub dir_path: PathBuf,
    pub name: String,
    pub file: PathBuf,
    pub format: ContentFormat,
}

impl Resolved {
    /// `dir/name` in unescaped virtual form, for messages and logs.
    pub fn display(&self) -> String {
        if self.dir.is_root() {
            self.name.clone()
        } else {
            format!("{}/{}", self.dir, self.name)
        }
    }
}

struct Inner {
    root: PathBuf,
    config: StoreConfig,
    dir_locks: LockTable,
    entry_locks: LockTable,
}

/// The contents service: documents addressed by (virtual directory, name).
///
/// Cheap to clone; clones share lock tables.
#[derive(Clone)]
pub struct ContentsStore {
    inner: Arc<Inner>,
}

impl ContentsStore {
    /// Open a store rooted at `config.root_dir`, creating the root if needed.
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        config.validate().context("invalid store configuration")?;
        std::fs::create_dir_all(&config.root_dir).with_context(|| {
            format!("failed to create contents root `{}`", config.root_dir.display())
        })?;
        let root = config.root_dir.canonicalize().with_context(|| {
            format!("failed to resolve contents root `{}`", config.root_dir.display())
        })?;

        info!(root = %root.display(), max_checkpoints = config.max_checkpoints, "contents store opened");
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                config,
                dir_locks: LockTable::new(),
                entry_locks: LockTable::new(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(self.clone())
    }

    pub(crate) fn entry_locks(&self) -> &LockTable {
        &self.inner.entry_locks
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Storage path of `dir`, following each segment to the entry it is
    /// stored under.
    async fn directory_path(&self, dir: &VirtualPath) -> StoreResult<PathBuf> {
        if let Some(reserved) = dir.segments().iter().find(|s| self.config().is_reserved(s)) {
            return Err(StoreError::invalid(format!("`{reserved}` is a reserved path segment")));
        }
        let direct = dir.to_storage_path(self.root());
        if fs::metadata(&direct).await.is_ok_and(|metadata| metadata.is_dir()) {
            return Ok(direct);
        }
        let mut path = self.root().to_path_buf();
        for segment in dir.segments() {
            let stored = walker::stored_name(&path, segment).await?;
            path.push(stored);
        }
        Ok(path)
    }

    pub(crate) async fn resolve(&self, dir: &VirtualPath, name: &str) -> StoreResult<Resolved> {
        let name = normalize_segment(name)?;
        if self.config().is_reserved(&name) {
            return Err(StoreError::invalid(format!("`{name}` is a reserved name")));
        }
        // Listings skip hidden entries and temp files share the dot prefix.
        if name.starts_with('.') {
            return Err(StoreError::invalid(format!("`{name}` is a hidden name")));
        }
        let format = self.config().format_for(&name).ok_or_else(|| {
            StoreError::invalid(format!("`{name}` does not have a recognized document extension"))
        })?;
        let dir_path = self.directory_path(dir).await?;
        let file = dir_path.join(walker::stored_name(&dir_path, &name).await?);
        Ok(Resolved { dir: dir.clone(), dir_path, name, file, format })
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Documents directly inside `dir`, without content, sorted by name.
    pub async fn list(&self, dir: &VirtualPath) -> StoreResult<Vec<DocumentModel>> {
        let dir_path = self.directory_path(dir).await?;
        let entries = walker::list_documents(&dir_path, &dir.to_string(), self.config()).await?;
        debug!(path = %dir, count = entries.len(), "listed directory");

        entries
            .into_iter()
            .map(|entry| {
                let (last_modified, created) = timestamps(&entry.metadata, &entry.path)?;
                Ok(DocumentModel {
                    name: entry.name,
                    path: dir.to_string(),
                    kind: entry.format.document_type(),
                    format: entry.format,
                    last_modified,
                    created,
                    content: None,
                })
            })
            .collect()
    }

    /// A document with its content.
    pub async fn read(&self, dir: &VirtualPath, name: &str) -> StoreResult<DocumentModel> {
        let doc = self.resolve(dir, name).await?;
        let _scope = self.entry_locks().read(&doc.file).await;

        let bytes = read_document_bytes(&doc).await?;
        let (format, value) = content::decode(doc.format, bytes)?;
        let mut model = self.describe(&doc).await?;
        model.format = format;
        model.content = Some(value);
        debug!(path = %doc.display(), "read document");
        Ok(model)
    }

    pub async fn exists(&self, dir: &VirtualPath, name: &str) -> StoreResult<bool> {
        let doc = self.resolve(dir, name).await?;
        match fs::metadata(&doc.file).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(StoreError::Storage {
                context: format!("checking `{}`", doc.display()),
                source: error,
            }),
        }
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Create a document. Without a name one is allocated (`Untitled<n>`);
    /// without content the format's empty content is written.
    pub async fn create(
        &self,
        dir: &VirtualPath,
        name: Option<&str>,
        content: Option<DocumentContent>,
    ) -> StoreResult<DocumentModel> {
        let dir_path = self.directory_path(dir).await?;
        walker::ensure_directory(&dir_path, &dir.to_string()).await?;
        let _dir_scope = self.inner.dir_locks.write(&dir_path).await;

        let encode = |doc: &Resolved| match &content {
            Some(content) => content::encode(doc.format, content),
            None => content::encode(doc.format, &content::default_content(doc.format, &doc.name)),
        };

        let doc = match name {
            Some(name) => {
                let doc = self.resolve(dir, name).await?;
                let bytes = encode(&doc)?;
                self.publish_new(&doc, &bytes).await?;
                doc
            }
            None => {
                let template = NameTemplate::untitled(
                    self.config().untitled_label.clone(),
                    self.config().default_extension.clone(),
                );
                self.publish_allocated(dir, &dir_path, &template, encode).await?
            }
        };

        info!(path = %doc.display(), "created document");
        self.describe(&doc).await
    }

    /// Replace a document's content, moving it to `new_dir`/`new_name` in the
    /// same operation when either differs from the current identity.
    pub async fn save(
        &self,
        dir: &VirtualPath,
        name: &str,
        content: DocumentContent,
        new_name: Option<&str>,
        new_dir: Option<&VirtualPath>,
    ) -> StoreResult<DocumentModel> {
        let src = self.resolve(dir, name).await?;
        let dst = self.resolve(new_dir.unwrap_or(dir), new_name.unwrap_or(&src.name)).await?;
        let bytes = content::encode(dst.format, &content)?;

        if src.file == dst.file {
            let _scope = self.entry_locks().write(&src.file).await;
            require_document(&src).await?;
            atomic::replace(&src.file, &bytes)
                .await
                .storage_context(|| format!("saving `{}`", src.display()))?;
            info!(path = %src.display(), bytes = bytes.len(), "saved document");
            return self.describe(&src).await;
        }

        walker::ensure_directory(&dst.dir_path, &dst.dir.to_string()).await?;
        let _dir_scope = self.inner.dir_locks.write(&dst.dir_path).await;
        let _scope = self.entry_locks().write_many([&src.file, &dst.file]).await;

        require_document(&src).await?;
        publish_unlocked(self.config(), &dst, &bytes).await?;
        if let Err(error) = fs::remove_file(&src.file).await {
            // Undo so the document does not end up under both identities.
            if let Err(undo) = fs::remove_file(&dst.file).await {
                warn!(path = %dst.display(), error = %undo, "failed to roll back save target");
            }
            return Err(StoreError::Storage {
                context: format!("removing `{}` after rename-on-save", src.display()),
                source: error,
            });
        }
        checkpoints::drop_all(self.config(), &src).await?;

        info!(from = %src.display(), to = %dst.display(), "saved and renamed document");
        self.describe(&dst).await
    }

    /// Change a document's name, keeping its content and directory.
    pub async fn rename(
        &self,
        dir: &VirtualPath,
        name: &str,
        new_name: &str,
    ) -> StoreResult<DocumentModel> {
        self.move_to(dir, name, dir, new_name).await
    }

    /// Change a document's identity without touching its content.
    pub async fn move_to(
        &self,
        dir: &VirtualPath,
        name: &str,
        new_dir: &VirtualPath,
        new_name: &str,
    ) -> StoreResult<DocumentModel> {
        let src = self.resolve(dir, name).await?;
        let dst = self.resolve(new_dir, new_name).await?;
        if src.format != dst.format {
            return Err(StoreError::invalid(format!(
                "cannot rename `{}` to `{}`: storage formats differ",
                src.name, dst.name
            )));
        }
        if src.file == dst.file {
            let _scope = self.entry_locks().read(&src.file).await;
            require_document(&src).await?;
            return self.describe(&src).await;
        }

        walker::ensure_directory(&dst.dir_path, &dst.dir.to_string()).await?;
        let _dir_scope = self.inner.dir_locks.write(&dst.dir_path).await;
        let _scope = self.entry_locks().write_many([&src.file, &dst.file]).await;

        require_document(&src).await?;
        atomic::rename_no_clobber(&src.file, &dst.file).await.map_err(|error| {
            if error.kind() == io::ErrorKind::AlreadyExists {
                StoreError::Conflict(dst.display())
            } else {
                StoreError::Storage {
                    context: format!("renaming `{}` to `{}`", src.display(), dst.display()),
                    source: error,
                }
            }
        })?;
        // Checkpoints belong to the old identity; a leftover sidecar at the
        // new one is from a document that no longer exists.
        checkpoints::drop_all(self.config(), &src).await?;
        checkpoints::drop_all(self.config(), &dst).await?;

        info!(from = %src.display(), to = %dst.display(), "renamed document");
        self.describe(&dst).await
    }

    /// Duplicate a document. Without a destination name one is allocated
    /// (`<stem>-Copy<n>`).
    pub async fn copy(
        &self,
        dir: &VirtualPath,
        source_name: &str,
        dest_name: Option<&str>,
    ) -> StoreResult<DocumentModel> {
        let src = self.resolve(dir, source_name).await?;
        let bytes = {
            let _scope = self.entry_locks().read(&src.file).await;
            read_document_bytes(&src).await?
        };

        let _dir_scope = self.inner.dir_locks.write(&src.dir_path).await;
        let dst = match dest_name {
            Some(dest_name) => {
                let dst = self.resolve(dir, dest_name).await?;
                ensure_same_format(&src, &dst)?;
                self.publish_new(&dst, &bytes).await?;
                dst
            }
            None => {
                let template = NameTemplate::copy_of(&src.name)?;
                self.publish_allocated(dir, &src.dir_path, &template, |_| Ok(bytes.clone()))
                    .await?
            }
        };

        info!(from = %src.display(), to = %dst.display(), "copied document");
        self.describe(&dst).await
    }

    /// Remove a document and all of its checkpoints.
    pub async fn delete(&self, dir: &VirtualPath, name: &str) -> StoreResult<()> {
        let doc = self.resolve(dir, name).await?;
        let _scope = self.entry_locks().write(&doc.file).await;

        require_document(&doc).await?;
        fs::remove_file(&doc.file).await.map_err(|error| not_found_or(error, &doc, "deleting"))?;
        checkpoints::drop_all(self.config(), &doc).await?;

        info!(path = %doc.display(), "deleted document");
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Publish `bytes` as a new document; the caller holds the directory scope.
    async fn publish_new(&self, doc: &Resolved, bytes: &[u8]) -> StoreResult<()> {
        let _scope = self.entry_locks().write(&doc.file).await;
        publish_unlocked(self.config(), doc, bytes).await
    }

    /// Allocate the first free name from `template` and publish a document
    /// under it. The caller holds the directory scope; a collision with a
    /// writer outside this process re-runs allocation.
    async fn publish_allocated<F>(
        &self,
        dir: &VirtualPath,
        dir_path: &Path,
        template: &NameTemplate,
        encode: F,
    ) -> StoreResult<Resolved>
    where
        F: Fn(&Resolved) -> StoreResult<Vec<u8>>,
    {
        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let taken = walker::entry_names(dir_path).await?;
            let doc = self.resolve(dir, &template.first_free(&taken)).await?;
            let bytes = encode(&doc)?;
            match self.publish_new(&doc, &bytes).await {
                Ok(()) => return Ok(doc),
                Err(StoreError::Conflict(_)) => {
                    warn!(path = %doc.display(), attempt, "allocated name was taken, retrying");
                }
                Err(error) => return Err(error),
            }
        }
        Err(StoreError::Conflict(format!(
            "no free name in `{dir}` after {MAX_ALLOCATION_ATTEMPTS} attempts"
        )))
    }

    /// Model without content, from the document's current metadata.
    async fn describe(&self, doc: &Resolved) -> StoreResult<DocumentModel> {
        let metadata = document_metadata(doc).await?;
        let (last_modified, created) = timestamps(&metadata, &doc.file)?;
        Ok(DocumentModel {
            name: doc.name.clone(),
            path: doc.dir.to_string(),
            kind: doc.format.document_type(),
            format: doc.format,
            last_modified,
            created,
            content: None,
        })
    }
}

/// Publish without taking the entry scope; the caller holds it.
async fn publish_unlocked(config: &StoreConfig, doc: &Resolved, bytes: &[u8]) -> StoreResult<()> {
    atomic::publish_new(&doc.file, bytes).await.map_err(|error| {
        if error.kind() == io::ErrorKind::AlreadyExists {
            StoreError::Conflict(doc.display())
        } else {
            StoreError::Storage { context: format!("creating `{}`", doc.display()), source: error }
        }
    })?;
    checkpoints::drop_all(config, doc).await
}

fn ensure_same_format(src: &Resolved, dst: &Resolved) -> StoreResult<()> {
    if src.format == dst.format {
        return Ok(());
    }
    Err(StoreError::invalid(format!(
        "cannot copy `{}` to `{}`: storage formats differ",
        src.name, dst.name
    )))
}

fn not_found_or(error: io::Error, doc: &Resolved, action: &str) -> StoreError {
    if error.kind() == io::ErrorKind::NotFound {
        StoreError::not_found("document", doc.display())
    } else {
        StoreError::Storage { context: format!("{action} `{}`", doc.display()), source: error }
    }
}

pub(crate) async fn document_metadata(doc: &Resolved) -> StoreResult<Metadata> {
    match fs::metadata(&doc.file).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata),
        Ok(_) => Err(StoreError::not_found("document", doc.display())),
        Err(error) => Err(not_found_or(error, doc, "reading metadata for")),
    }
}

pub(crate) async fn require_document(doc: &Resolved) -> StoreResult<()> {
    document_metadata(doc).await.map(|_| ())
}

pub(crate) async fn read_document_bytes(doc: &Resolved) -> StoreResult<Vec<u8>> {
    require_document(doc).await?;
    fs::read(&doc.file).await.map_err(|error| not_found_or(error, doc, "reading"))
}

/// `(last_modified, created)`; creation falls back to modification time on
/// media that do not record it.
pub(crate) fn timestamps(
    metadata: &Metadata,
    path: &Path,
) -> StoreResult<(DateTime<Utc>, DateTime<Utc>)> {
    let modified = metadata
        .modified()
        .storage_context(|| format!("reading modification time of `{}`", path.display()))?;
    let created = metadata.created().unwrap_or(modified);
    Ok((DateTime::<Utc>::from(modified), DateTime::<Utc>::from(created)))
}
