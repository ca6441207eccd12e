//! Lock (C2): scoped, cross-process advisory file lock identified by a
//! path. Weak by design — a crash releases the OS-level lock for free, so
//! no lock file is ever left permanently held.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::fs_err3_tokio::AsyncFileExt as _;
use fs_err::tokio::{File, OpenOptions};
use tokio::time::sleep;

use crate::error::HubError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A held advisory lock. Unlocking and best-effort file removal happen on
/// drop, covering both the happy path and early returns via `?`.
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if missing and blocks (polling) until an
    /// exclusive lock is acquired.
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self, HubError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .await?;

        loop {
            if file.try_lock_exclusive()? {
                break;
            }
            tracing::debug!(path = %path.display(), "waiting on lock");
            sleep(POLL_INTERVAL).await;
        }

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Runs `body` while holding the lock, releasing it (and removing the
    /// lock file) on all exit paths regardless of whether `body` succeeds.
    pub async fn scoped<F, Fut, T>(path: impl Into<PathBuf>, body: F) -> Result<T, HubError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, HubError>>,
    {
        let lock = Self::acquire(path).await?;
        let result = body().await;
        drop(lock);
        result
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        // Best-effort cleanup; a concurrent holder recreating the file
        // between unlock and removal is harmless — the file is just a
        // lock token, not the protected resource.
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn scoped_lock_serializes_concurrent_access() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("x.lock");
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock_path = lock_path.clone();
            let counter = Arc::clone(&counter);
            let max_concurrent = Arc::clone(&max_concurrent);
            handles.push(tokio::spawn(async move {
                FileLock::scoped(lock_path, || async {
                    let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, HubError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_released_on_error_path() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("y.lock");

        let result: Result<(), HubError> = FileLock::scoped(lock_path.clone(), || async {
            Err(HubError::InvalidUsage("boom".to_string()))
        })
        .await;
        assert!(result.is_err());

        // A fresh acquire must not block forever.
        let relocked = FileLock::acquire(lock_path).await;
        assert!(relocked.is_ok());
    }
}
