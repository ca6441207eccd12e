//! Blob Store (C8): orchestrates on-disk state for one repository folder —
//! content-addressed blobs, refs, snapshot pointers, no-exist markers, and
//! symlink/copy fallback for pointer materialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::HeaderMap;

use crate::cache::symlink::{SymlinkProbe, default_mode};
use crate::error::HubError;
use crate::http::session::HttpSession;
use crate::http::transport::http_get;
use crate::lock::FileLock;
use crate::path;
use crate::types::{Etag, RepoId};

pub struct BlobStore {
    cache_dir: PathBuf,
    symlink_probe: Arc<SymlinkProbe>,
}

impl BlobStore {
    pub fn new(cache_dir: impl Into<PathBuf>, symlink_probe: Arc<SymlinkProbe>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            symlink_probe,
        }
    }

    pub fn repo_root(&self, repo: &RepoId) -> PathBuf {
        path::repo_root(&self.cache_dir, repo)
    }

    /// Returns the pointer path if `snapshots/<commit>/<rel>` already
    /// exists, without touching the network or taking any lock.
    pub async fn existing_pointer(
        &self,
        repo: &RepoId,
        commit: &str,
        rel: &str,
    ) -> Result<Option<PathBuf>, HubError> {
        let pointer = path::pointer_path(&self.repo_root(repo), commit, rel)?;
        Ok(if fs_err::tokio::try_exists(&pointer).await? {
            Some(pointer)
        } else {
            None
        })
    }

    /// Returns the pointer path for `(commit, rel)`, fetching and
    /// materializing the blob if necessary. Concurrent callers for the
    /// same `(repo, etag)` serialize through the blob's lock file; the
    /// loser of the race observes the finished blob and skips the GET. A
    /// pre-existing `.incomplete` file is resumed from its current length
    /// unless `force` is set, in which case it is deleted and restarted.
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure_pointer(
        &self,
        session: &HttpSession,
        repo: &RepoId,
        commit: &str,
        rel: &str,
        etag: &Etag,
        expected_size: u64,
        download_url: &str,
        request_headers: HeaderMap,
        force: bool,
    ) -> Result<PathBuf, HubError> {
        let repo_root = self.repo_root(repo);
        let pointer = path::pointer_path(&repo_root, commit, rel)?;

        if !force && fs_err::tokio::try_exists(&pointer).await? {
            return Ok(pointer);
        }

        let lock_path = path::lock_path(&self.cache_dir, repo, etag.as_str());
        let blob_path = path::blob_path(&repo_root, etag.as_str());
        let incomplete_path = path::incomplete_blob_path(&repo_root, etag.as_str());

        let lock = FileLock::acquire(lock_path).await?;

        let blob_exists = fs_err::tokio::try_exists(&blob_path).await?;
        let new_blob = force || !blob_exists;
        if new_blob {
            fs_err::tokio::create_dir_all(&repo_root.join("blobs")).await?;
            if force {
                let _ = fs_err::tokio::remove_file(&incomplete_path).await;
            }
            let resume_size = fs_err::tokio::metadata(&incomplete_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            let mut file = fs_err::tokio::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&incomplete_path)
                .await?;
            http_get(
                session,
                download_url,
                &mut file,
                request_headers,
                resume_size,
                expected_size,
                &repo.to_string(),
            )
            .await?;
            drop(file);
            fs_err::tokio::rename(&incomplete_path, &blob_path).await?;
            tracing::debug!(repo = %repo, etag = %etag, "blob materialized");
        }

        self.materialize_pointer(&repo_root, &blob_path, &pointer, new_blob).await?;
        drop(lock);
        Ok(pointer)
    }

    /// Materializes a pointer for a blob that is already present, taking
    /// the blob's lock to serialize against a concurrent fetch of the same
    /// blob that hasn't finished pointer materialization yet.
    pub async fn materialize_existing_blob_pointer(
        &self,
        repo: &RepoId,
        commit: &str,
        rel: &str,
        etag: &Etag,
    ) -> Result<PathBuf, HubError> {
        let repo_root = self.repo_root(repo);
        let pointer = path::pointer_path(&repo_root, commit, rel)?;
        if fs_err::tokio::try_exists(&pointer).await? {
            return Ok(pointer);
        }

        let lock_path = path::lock_path(&self.cache_dir, repo, etag.as_str());
        let _lock = FileLock::acquire(lock_path).await?;

        if fs_err::tokio::try_exists(&pointer).await? {
            return Ok(pointer);
        }
        let blob_path = path::blob_path(&repo_root, etag.as_str());
        self.materialize_pointer(&repo_root, &blob_path, &pointer, false).await?;
        Ok(pointer)
    }

    async fn materialize_pointer(
        &self,
        repo_root: &Path,
        blob_path: &Path,
        pointer: &Path,
        new_blob: bool,
    ) -> Result<(), HubError> {
        if let Some(parent) = pointer.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        if fs_err::tokio::try_exists(pointer).await? {
            fs_err::tokio::remove_file(pointer).await?;
        }

        if self.symlink_probe.supports_symlinks(repo_root).await? {
            let relative = pathdiff(repo_root, pointer, blob_path);
            symlink(&relative, pointer).await?;
        } else if new_blob {
            fs_err::tokio::rename(blob_path, pointer).await?;
        } else {
            fs_err::tokio::copy(blob_path, pointer).await?;
        }

        if let Ok(mode) = default_mode(repo_root).await {
            set_mode(pointer, mode).await;
        }
        Ok(())
    }

    /// Records that the server confirmed absence of `(commit, rel)`; later
    /// offline lookups return cached-absent without a network call.
    pub async fn mark_no_exist(&self, repo: &RepoId, commit: &str, rel: &str) -> Result<(), HubError> {
        let marker = path::no_exist_path(&self.repo_root(repo), commit, rel)?;
        if let Some(parent) = marker.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        fs_err::tokio::write(&marker, b"").await?;
        Ok(())
    }

    pub async fn is_marked_no_exist(&self, repo: &RepoId, commit: &str, rel: &str) -> Result<bool, HubError> {
        let marker = path::no_exist_path(&self.repo_root(repo), commit, rel)?;
        Ok(fs_err::tokio::try_exists(&marker).await?)
    }

    /// Writes the resolved commit hash into `refs/<revision>`, but only
    /// when it differs from the stored value (avoids useless writes under
    /// read-only caches).
    pub async fn update_ref(&self, repo: &RepoId, revision: &str, commit: &str) -> Result<(), HubError> {
        if revision == commit {
            return Ok(());
        }
        let refs_path = path::refs_path(&self.repo_root(repo), revision);
        if let Ok(existing) = fs_err::tokio::read_to_string(&refs_path).await
            && existing.trim() == commit
        {
            return Ok(());
        }
        if let Some(parent) = refs_path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let tmp = refs_path.with_extension(format!("tmp.{}", std::process::id()));
        fs_err::tokio::write(&tmp, commit.as_bytes()).await?;
        if let Err(e) = fs_err::tokio::rename(&tmp, &refs_path).await {
            let _ = fs_err::tokio::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn read_ref(&self, repo: &RepoId, revision: &str) -> Option<String> {
        let refs_path = path::refs_path(&self.repo_root(repo), revision);
        fs_err::tokio::read_to_string(&refs_path)
            .await
            .ok()
            .map(|s| s.trim().to_string())
    }
}

/// Relative path from `pointer`'s directory back up to `repo_root` and
/// down into `blobs/<etag>`. `rel` may be nested (`sub/dir/file.bin`), so
/// the depth below `repo_root` is whatever `pointer`'s parent actually is,
/// not a fixed constant.
fn pathdiff(repo_root: &Path, pointer: &Path, blob: &Path) -> PathBuf {
    let pointer_dir = pointer.parent().unwrap_or(repo_root);
    let depth = pointer_dir
        .strip_prefix(repo_root)
        .map(|rel| rel.components().count())
        .unwrap_or(0);
    let mut relative = PathBuf::new();
    for _ in 0..depth {
        relative.push("..");
    }
    relative.push("blobs");
    relative.push(blob.file_name().expect("blob path has a file name"));
    relative
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs_err::tokio::set_permissions(path, std::fs::Permissions::from_mode(mode)).await;
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) {}
