//! Local-Dir Mirror (C9): replicates one file directly under a user-chosen
//! directory, tracking freshness with a plaintext sidecar instead of the
//! content-addressed blob cache's symlink layout.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::cache::blob_store::BlobStore;
use crate::error::HubError;
use crate::http::metadata::head_metadata;
use crate::http::session::HttpSession;
use crate::http::transport::http_get;
use crate::lock::FileLock;
use crate::path;
use crate::types::RepoId;

const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

struct Sidecar {
    commit: String,
    etag: String,
    timestamp: f64,
}

impl Sidecar {
    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let commit = lines.next()?.to_string();
        let etag = lines.next()?.to_string();
        let timestamp: f64 = lines.next()?.parse().ok()?;
        Some(Self { commit, etag, timestamp })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n{}\n", self.commit, self.etag, self.timestamp)
    }
}

pub struct LocalDirMirror;

impl LocalDirMirror {
    pub fn new() -> Self {
        Self
    }

    /// Ensures `filename` exists, fresh, directly under `local_dir`, and
    /// returns its path. `revision` is whatever the caller requested
    /// (commit hash or symbolic); `is_commit_hash` tells step 1 whether an
    /// exact-match short-circuit is even possible.
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure_file(
        &self,
        session: &HttpSession,
        blob_store: &BlobStore,
        repo: &RepoId,
        local_dir: &Path,
        filename: &str,
        revision: &str,
        is_commit_hash: bool,
        download_url: &str,
        auth_header: Option<&str>,
        etag_timeout: Duration,
        force: bool,
    ) -> Result<PathBuf, HubError> {
        let paths = path::local_paths(local_dir, filename);
        ensure_gitignore(local_dir).await?;

        let lock_path = paths.lock.clone();
        FileLock::scoped(lock_path, || async move {
            self.ensure_file_locked(
                session,
                blob_store,
                repo,
                &paths,
                revision,
                is_commit_hash,
                download_url,
                auth_header,
                etag_timeout,
                force,
            )
            .await
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn ensure_file_locked(
        &self,
        session: &HttpSession,
        blob_store: &BlobStore,
        repo: &RepoId,
        paths: &path::LocalPaths,
        revision: &str,
        is_commit_hash: bool,
        download_url: &str,
        auth_header: Option<&str>,
        etag_timeout: Duration,
        force: bool,
    ) -> Result<PathBuf, HubError> {
        let file_exists = fs_err::tokio::try_exists(&paths.file).await?;
        let sidecar = if force {
            None
        } else {
            read_valid_sidecar(&paths.metadata, &paths.file, file_exists).await?
        };

        // Step 1: sidecar commit matches an exact commit-hash request.
        if !force
            && let Some(sc) = &sidecar
            && file_exists
            && is_commit_hash
            && sc.commit == revision
        {
            return Ok(paths.file.clone());
        }

        // Step 2: probe and compare against the sidecar's stored etag.
        let meta = head_metadata(
            &session.client(),
            download_url,
            auth_header,
            etag_timeout,
            &repo.to_string(),
        )
        .await?;

        if !force
            && let Some(sc) = &sidecar
            && file_exists
            && sc.etag == meta.etag.as_str()
        {
            write_sidecar(&paths.metadata, &paths.file, &meta.commit, meta.etag.as_str()).await?;
            return Ok(paths.file.clone());
        }

        // Step 3: reaching here means the sidecar was absent, or present
        // with an etag that didn't match the probe (step 2 would have
        // returned otherwise). Either way, if the file is present and the
        // server's etag looks like a content hash, confirm by hash rather
        // than re-downloading.
        if !force && file_exists && meta.etag.looks_like_sha256() {
            let digest = sha256_of_file(&paths.file).await?;
            if digest == meta.etag.as_str() {
                write_sidecar(&paths.metadata, &paths.file, &meta.commit, meta.etag.as_str()).await?;
                return Ok(paths.file.clone());
            }
        }

        // Step 4: a content-addressed copy already exists in the blob
        // cache; hard-copy it rather than re-downloading.
        let cached_blob = path::blob_path(&blob_store.repo_root(repo), meta.etag.as_str());
        if !force && fs_err::tokio::try_exists(&cached_blob).await? {
            if let Some(parent) = paths.file.parent() {
                fs_err::tokio::create_dir_all(parent).await?;
            }
            fs_err::tokio::copy(&cached_blob, &paths.file).await?;
            write_sidecar(&paths.metadata, &paths.file, &meta.commit, meta.etag.as_str()).await?;
            return Ok(paths.file.clone());
        }

        // Step 5: download via the byte transport into an incomplete path
        // in the sidecar's own directory, then rename into place. A stale
        // incomplete is resumed from its current length unless `force` asks
        // for a fresh restart.
        if file_exists {
            fs_err::tokio::remove_file(&paths.file).await?;
        }
        let incomplete = path::incomplete_local_path(&paths.metadata, meta.etag.as_str());
        if let Some(parent) = incomplete.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        if force {
            let _ = fs_err::tokio::remove_file(&incomplete).await;
        }
        let resume_size = fs_err::tokio::metadata(&incomplete).await.map(|m| m.len()).unwrap_or(0);
        let mut file = fs_err::tokio::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&incomplete)
            .await?;
        // The probed URL and its Location may not be same-origin (a signed,
        // unauthenticated CDN link); replaying the bearer token there would
        // leak it to a third party.
        let auth_for_get = if crate::http::metadata::same_host(download_url, &meta.location) {
            auth_header
        } else {
            None
        };
        http_get(
            session,
            &meta.location,
            &mut file,
            build_auth_headers(auth_for_get),
            resume_size,
            meta.size,
            &repo.to_string(),
        )
        .await?;
        drop(file);
        if let Some(parent) = paths.file.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        fs_err::tokio::rename(&incomplete, &paths.file).await?;
        write_sidecar(&paths.metadata, &paths.file, &meta.commit, meta.etag.as_str()).await?;
        Ok(paths.file.clone())
    }
}

impl Default for LocalDirMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn build_auth_headers(auth_header: Option<&str>) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = auth_header
        && let Ok(value) = format!("Bearer {token}").parse()
    {
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    headers
}

/// Reads the sidecar and validates it against the file's current mtime.
/// A stale or unparseable sidecar is treated as absent, never as an error.
async fn read_valid_sidecar(metadata_path: &Path, file: &Path, file_exists: bool) -> Result<Option<Sidecar>, HubError> {
    if !file_exists {
        return Ok(None);
    }
    let Ok(text) = fs_err::tokio::read_to_string(metadata_path).await else {
        return Ok(None);
    };
    let Some(sidecar) = Sidecar::parse(&text) else {
        return Ok(None);
    };
    let Ok(meta) = fs_err::tokio::metadata(file).await else {
        return Ok(None);
    };
    let Ok(modified) = meta.modified() else {
        return Ok(None);
    };
    let actual = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    if (actual - sidecar.timestamp).abs() > MTIME_TOLERANCE.as_secs_f64() {
        return Ok(None);
    }
    Ok(Some(sidecar))
}

/// Writes the sidecar with `file`'s own current mtime as the stored
/// timestamp (rather than "now"), so an unmodified file — step 2's
/// unchanged-etag case — still validates on the next read.
async fn write_sidecar(metadata_path: &Path, file: &Path, commit: &str, etag: &str) -> Result<(), HubError> {
    if let Some(parent) = metadata_path.parent() {
        fs_err::tokio::create_dir_all(parent).await?;
    }
    let modified = fs_err::tokio::metadata(file).await?.modified()?;
    let timestamp = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    let sidecar = Sidecar {
        commit: commit.to_string(),
        etag: etag.to_string(),
        timestamp,
    };
    let tmp = metadata_path.with_extension(format!("tmp.{}", std::process::id()));
    fs_err::tokio::write(&tmp, sidecar.render().as_bytes()).await?;
    if let Err(e) = fs_err::tokio::rename(&tmp, metadata_path).await {
        let _ = fs_err::tokio::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn sha256_of_file(path: &Path) -> Result<String, HubError> {
    let bytes = fs_err::tokio::read(path).await?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

async fn ensure_gitignore(local_dir: &Path) -> Result<(), HubError> {
    let gitignore = path::gitignore_path(local_dir);
    if fs_err::tokio::try_exists(&gitignore).await? {
        return Ok(());
    }
    if let Some(parent) = gitignore.parent() {
        fs_err::tokio::create_dir_all(parent).await?;
    }
    fs_err::tokio::write(&gitignore, b"*\n").await?;
    Ok(())
}
