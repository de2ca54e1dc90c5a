// Exclusive scopes keyed by resolved storage path.
//
// Guards are owned, so a scope lives across `.await` points and is released
// when dropped, whichever way the operation exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Idle slots are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 256;

#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

/// Shared scope over one key.
#[derive(Debug)]
pub struct ReadScope {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive scope over one or more keys.
#[derive(Debug)]
pub struct WriteScope {
    _guards: Vec<OwnedRwLockWriteGuard<()>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &Path) -> Arc<RwLock<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() >= PRUNE_THRESHOLD {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Arc::clone(slots.entry(key.to_path_buf()).or_default())
    }

    pub async fn read(&self, key: &Path) -> ReadScope {
        ReadScope { _guard: self.slot(key).read_owned().await }
    }

    pub async fn write(&self, key: &Path) -> WriteScope {
        self.write_many([key]).await
    }

    /// Lock several keys exclusively. Keys are taken in sorted order so two
    /// callers locking overlapping sets cannot deadlock.
    pub async fn write_many<I, P>(&self, keys: I) -> WriteScope
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut keys: Vec<PathBuf> = keys.into_iter().map(|k| k.as_ref().to_path_buf()).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.slot(&key).write_owned().await);
        }
        WriteScope { _guards: guards }
    }

    /// Number of tracked slots, busy or idle.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn readers_share_a_key() {
        let table = LockTable::new();
        let key = Path::new("/root/a.ipynb");
        let _first = table.read(key).await;
        let second = tokio::time::timeout(Duration::from_millis(100), table.read(key)).await;
        assert!(second.is_ok(), "second reader should not block");
    }

    #[tokio::test]
    async fn writer_excludes_readers_until_dropped() {
        let table = Arc::new(LockTable::new());
        let key = PathBuf::from("/root/a.ipynb");

        let scope = table.write(&key).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), table.read(&key)).await;
        assert!(blocked.is_err(), "reader should wait for writer");

        drop(scope);
        let unblocked = tokio::time::timeout(Duration::from_millis(100), table.read(&key)).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn disjoint_keys_do_not_interfere() {
        let table = LockTable::new();
        let _a = table.write(Path::new("/root/a.ipynb")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            table.write(Path::new("/root/b.ipynb")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn write_many_tolerates_duplicates_and_any_order() {
        let table = Arc::new(LockTable::new());
        let in_critical = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for i in 0..8 {
            let table = Arc::clone(&table);
            let in_critical = Arc::clone(&in_critical);
            tasks.push(tokio::spawn(async move {
                let keys = if i % 2 == 0 {
                    vec!["/r/x", "/r/y", "/r/x"]
                } else {
                    vec!["/r/y", "/r/x"]
                };
                let _scope = table.write_many(keys).await;
                assert_eq!(in_critical.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_critical.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for task in tasks {
            task.await.expect("task should not panic");
        }
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let table = LockTable::new();
        for i in 0..(PRUNE_THRESHOLD + 10) {
            let _scope = table.write(&PathBuf::from(format!("/r/{i}"))).await;
        }
        assert!(table.len() < PRUNE_THRESHOLD + 10);
    }
}
