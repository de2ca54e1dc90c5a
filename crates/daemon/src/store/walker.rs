// Directory enumeration for listings and name allocation. Never recurses.

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use nbstore_common::path::normalize_segment;
use nbstore_common::types::ContentFormat;
use tokio::fs;

use super::error::{StorageContext, StoreError, StoreResult};
use crate::config::StoreConfig;

/// A recognized document found directly inside a directory.
#[derive(Debug)]
pub struct DocumentEntry {
    /// NFC-normalized file name.
    pub name: String,
    pub path: PathBuf,
    pub format: ContentFormat,
    pub metadata: Metadata,
}

/// Fail with `NotFound` unless `dir` exists and is a directory.
pub async fn ensure_directory(dir: &Path, display: &str) -> StoreResult<()> {
    match fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(StoreError::not_found("directory", display)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(StoreError::not_found("directory", display))
        }
        Err(error) => Err(StoreError::Storage {
            context: format!("reading directory `{}`", dir.display()),
            source: error,
        }),
    }
}

/// Recognized documents directly inside `dir`, sorted by name.
///
/// Hidden entries, subdirectories and unrecognized extensions are skipped.
pub async fn list_documents(
    dir: &Path,
    display: &str,
    config: &StoreConfig,
) -> StoreResult<Vec<DocumentEntry>> {
    ensure_directory(dir, display).await?;

    let mut entries = fs::read_dir(dir)
        .await
        .storage_context(|| format!("listing directory `{}`", dir.display()))?;

    let mut documents = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .storage_context(|| format!("listing directory `{}`", dir.display()))?
    {
        let Some(name) = entry_name(&entry) else {
            continue;
        };
        if name.starts_with('.') || config.is_reserved(&name) {
            continue;
        }
        let Some(format) = config.format_for(&name) else {
            continue;
        };
        // Entries can vanish between read_dir and stat.
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => {
                return Err(StoreError::Storage {
                    context: format!("reading metadata for `{}`", entry.path().display()),
                    source: error,
                })
            }
        };
        if !metadata.is_file() {
            continue;
        }
        documents.push(DocumentEntry { name, path: entry.path(), format, metadata });
    }

    documents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(documents)
}

/// Every name present in `dir` (any kind of entry), NFC-normalized.
pub async fn entry_names(dir: &Path) -> StoreResult<HashSet<String>> {
    let mut entries = fs::read_dir(dir)
        .await
        .storage_context(|| format!("listing directory `{}`", dir.display()))?;

    let mut names = HashSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .storage_context(|| format!("listing directory `{}`", dir.display()))?
    {
        if let Some(name) = entry_name(&entry) {
            names.insert(name);
        }
    }
    Ok(names)
}

/// The name `segment` is stored under inside `parent`.
///
/// Entries written in another Unicode normalization form are matched by their
/// NFC name. A segment with no entry maps to itself.
pub async fn stored_name(parent: &Path, segment: &str) -> StoreResult<String> {
    if fs::symlink_metadata(parent.join(segment)).await.is_ok() {
        return Ok(segment.to_string());
    }
    // Missing or unreadable parents surface later as NotFound.
    let Ok(mut entries) = fs::read_dir(parent).await else {
        return Ok(segment.to_string());
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .storage_context(|| format!("listing directory `{}`", parent.display()))?
    {
        let Ok(raw) = entry.file_name().into_string() else {
            continue;
        };
        if normalize_segment(&raw).is_ok_and(|nfc| nfc == segment) {
            return Ok(raw);
        }
    }
    Ok(segment.to_string())
}

fn entry_name(entry: &fs::DirEntry) -> Option<String> {
    let raw = entry.file_name().into_string().ok()?;
    normalize_segment(&raw).ok()
}
