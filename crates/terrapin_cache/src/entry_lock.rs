//! The advisory file lock serializing materialization of one cache entry
//! across processes on the same host.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use fs4::fs_std::FileExt;
use simple_spawn_blocking::tokio::run_blocking_task;

use crate::CacheError;

const LOCK_ATTEMPTS: u32 = 60;
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// An exclusive lock on an entry's `.lock` file. Held for the whole of
/// `warm_up`; released on drop, on every exit path.
#[derive(Debug)]
pub struct EntryLock {
    file: Arc<std::fs::File>,
    path: PathBuf,
}

impl EntryLock {
    /// Acquires the lock at `path`, retrying on contention with the default
    /// bound (60 attempts, 5 s apart).
    pub async fn acquire(path: &Path) -> Result<Self, CacheError> {
        Self::acquire_with(path, LOCK_ATTEMPTS, LOCK_RETRY_DELAY).await
    }

    /// Acquires the lock with an explicit attempt bound and retry delay.
    pub async fn acquire_with(
        path: &Path,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::CreateDir {
                    path: parent.to_owned(),
                    source,
                })?;
        }

        let lock_path = path.to_owned();
        let file = run_blocking_task(move || {
            fs_err::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)
                .map(|file| Arc::new(file.into_parts().0))
                .map_err(|source| CacheError::LockOpen {
                    path: lock_path.clone(),
                    source,
                })
        })
        .await?;

        for attempt in 1..=attempts.max(1) {
            let file_for_lock = file.clone();
            let lock_path = path.to_owned();
            let acquired = run_blocking_task(move || {
                file_for_lock.try_lock_exclusive()
                    .map_err(|source| CacheError::LockOpen {
                        path: lock_path,
                        source,
                    })
            })
            .await?;
            if acquired {
                return Ok(Self {
                    file,
                    path: path.to_owned(),
                });
            }
            if attempt < attempts {
                tracing::debug!(
                    lock = %path.display(),
                    attempt,
                    "cache entry is locked by another process, waiting"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(CacheError::LockExhausted {
            path: path.to_owned(),
            attempts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::EntryLock;
    use crate::CacheError;

    #[tokio::test]
    async fn contention_exhausts_the_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.lock");

        let held = EntryLock::acquire_with(&path, 1, Duration::from_millis(1))
            .await
            .unwrap();
        assert_matches!(
            EntryLock::acquire_with(&path, 2, Duration::from_millis(1)).await,
            Err(CacheError::LockExhausted { attempts: 2, .. })
        );

        drop(held);
        EntryLock::acquire_with(&path, 1, Duration::from_millis(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/entry.lock");
        let lock = EntryLock::acquire_with(&path, 1, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(lock.path(), path);
    }
}
