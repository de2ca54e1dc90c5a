// Crash-consistent file publishing: write to a sibling temp file, fsync, then
// move into place. Temp files are dot-prefixed so listings never show them.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Atomically replace (or create) `target` with `bytes`.
pub async fn replace(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = write_temp(target, bytes).await?;
    if let Err(error) = fs::rename(&tmp_path, target).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(error);
    }
    Ok(())
}

/// Atomically create `target` with `bytes`, failing with
/// [`io::ErrorKind::AlreadyExists`] if it already exists.
pub async fn publish_new(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = write_temp(target, bytes).await?;
    let result = rename_no_clobber(&tmp_path, target).await;
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// Move `from` to `to` without ever replacing an existing `to`.
///
/// A hard link makes the check-and-create a single filesystem operation;
/// media without hard links fall back to a checked rename.
pub async fn rename_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to).await {
        Ok(()) => {
            if let Err(error) = fs::remove_file(from).await {
                // Keep the file under exactly one name.
                let _ = fs::remove_file(to).await;
                return Err(error);
            }
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Err(error),
        Err(_) => {
            if fs::try_exists(to).await? {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            fs::rename(from, to).await
        }
    }
}

async fn write_temp(target: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let tmp_path = temp_path_for(target);
    let mut file = fs::File::create(&tmp_path).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.sync_data().await
    }
    .await;
    drop(file);

    match written {
        Ok(()) => Ok(tmp_path),
        Err(error) => {
            let _ = fs::remove_file(&tmp_path).await;
            Err(error)
        }
    }
}

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp_name = format!(".{name}.tmp.{}", Uuid::new_v4().simple());
    match target.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}
