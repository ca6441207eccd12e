//! Single-File Coordinator (C10): orchestrates C1–C9 to produce a stable
//! local path for one `(repo, revision, filename)` tuple, including the
//! offline-fallback branch when the metadata probe can't be reached.

use std::path::{Path, PathBuf};

use reqwest::header::HeaderMap;

use crate::api::resolve_url;
use crate::cache::{BlobStore, LocalDirMirror};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::http::metadata::head_metadata;
use crate::http::session::HttpSession;
use crate::types::{RepoId, is_commit_hash};

/// One `download_file` request. Borrowed fields keep this cheap to build
/// per call; nothing here is retained past the call.
pub struct FileRequest<'a> {
    pub repo: &'a RepoId,
    pub filename: &'a str,
    pub revision: &'a str,
    pub local_dir: Option<&'a Path>,
    pub force_download: bool,
    pub local_files_only: bool,
}

/// Resolves `request` to a local path, downloading or reusing cached bytes
/// as needed. `auth_header` is the bearer token already resolved by the
/// caller (§6's token-acceptance rule has already run by this point).
pub async fn download_file(
    session: &HttpSession,
    config: &HubConfig,
    blob_store: &BlobStore,
    local_mirror: &LocalDirMirror,
    auth_header: Option<&str>,
    request: &FileRequest<'_>,
) -> Result<PathBuf, HubError> {
    if request.force_download && request.local_files_only {
        return Err(HubError::InvalidUsage(
            "force_download and local_files_only are mutually exclusive".to_string(),
        ));
    }

    let revision_is_hash = is_commit_hash(request.revision);

    if !request.force_download
        && request.local_dir.is_none()
        && revision_is_hash
        && let Some(pointer) = blob_store
            .existing_pointer(request.repo, request.revision, request.filename)
            .await?
    {
        return Ok(pointer);
    }

    if request.local_files_only {
        return offline_fallback(blob_store, request, revision_is_hash, None).await;
    }

    let url = resolve_url(&config.endpoint, request.repo, request.revision, request.filename);

    // C9 runs its own probe internally (it needs the response to compare
    // against the sidecar), so the local-dir branch hands it the resolve
    // URL directly rather than probing twice.
    if let Some(local_dir) = request.local_dir {
        return match local_mirror
            .ensure_file(
                session,
                blob_store,
                request.repo,
                local_dir,
                request.filename,
                request.revision,
                revision_is_hash,
                &url,
                auth_header,
                config.etag_timeout,
                request.force_download,
            )
            .await
        {
            Ok(path) => Ok(path),
            Err(err) => offline_fallback(blob_store, request, revision_is_hash, Some(err)).await,
        };
    }

    let probe = head_metadata(
        &session.client(),
        &url,
        auth_header,
        config.etag_timeout,
        &request.repo.to_string(),
    )
    .await;
    let meta = match probe {
        Ok(meta) => meta,
        Err(err) => {
            if let HubError::EntryNotFound { revision: commit, .. } = &err
                && commit != "unknown"
            {
                blob_store.mark_no_exist(request.repo, commit, request.filename).await?;
                if !revision_is_hash {
                    blob_store.update_ref(request.repo, request.revision, commit).await?;
                }
            }
            return offline_fallback(blob_store, request, revision_is_hash, Some(err)).await;
        }
    };

    if !revision_is_hash {
        blob_store.update_ref(request.repo, request.revision, &meta.commit).await?;
    }

    // `meta.location` may be a signed, unauthenticated CDN redirect target
    // off the probed host; replaying the bearer token there would leak it.
    let auth_for_get = if crate::http::metadata::same_host(&url, &meta.location) {
        auth_header
    } else {
        None
    };

    blob_store
        .ensure_pointer(
            session,
            request.repo,
            &meta.commit,
            request.filename,
            &meta.etag,
            meta.size,
            &meta.location,
            auth_headers(auth_for_get),
            request.force_download,
        )
        .await
}

/// Resolves a cached commit (the requested hash, or a stored `refs/`
/// resolution for a symbolic revision) and returns a cached copy if one
/// exists; otherwise classifies `probe_err` per spec.md §4.10.
async fn offline_fallback(
    blob_store: &BlobStore,
    request: &FileRequest<'_>,
    revision_is_hash: bool,
    probe_err: Option<HubError>,
) -> Result<PathBuf, HubError> {
    if let Some(local_dir) = request.local_dir {
        let candidate = local_dir.join(request.filename);
        if fs_err::tokio::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    } else {
        let commit = if revision_is_hash {
            Some(request.revision.to_string())
        } else {
            blob_store.read_ref(request.repo, request.revision).await
        };
        if let Some(commit) = commit
            && let Some(pointer) = blob_store
                .existing_pointer(request.repo, &commit, request.filename)
                .await?
        {
            return Ok(pointer);
        }
    }

    if request.local_files_only {
        return Err(HubError::LocalEntryNotFound {
            path: request.filename.to_string(),
            reason: "local_files_only is set and no cached copy was found".to_string(),
        });
    }

    match probe_err {
        Some(err) if err.is_authentic_refusal() => Err(err),
        Some(err) => Err(HubError::LocalEntryNotFound {
            path: request.filename.to_string(),
            reason: format!("network probe failed and no cached copy was found: {err}"),
        }),
        None => Err(HubError::LocalEntryNotFound {
            path: request.filename.to_string(),
            reason: "no cached copy was found".to_string(),
        }),
    }
}

fn auth_headers(auth_header: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(token) = auth_header
        && let Ok(value) = format!("Bearer {token}").parse()
    {
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    headers
}

/// Pure, offline, no-network lookup for an already-cached file: the
/// counterpart to `download_file`'s offline-fallback branch, exposed
/// publicly so embedding applications can check cache state synchronously.
pub async fn try_to_load_from_cache(
    blob_store: &BlobStore,
    repo: &RepoId,
    filename: &str,
    revision: &str,
) -> Result<Option<PathBuf>, HubError> {
    let commit = if is_commit_hash(revision) {
        Some(revision.to_string())
    } else {
        blob_store.read_ref(repo, revision).await
    };
    let Some(commit) = commit else {
        return Ok(None);
    };
    if blob_store.is_marked_no_exist(repo, &commit, filename).await? {
        return Ok(None);
    }
    blob_store.existing_pointer(repo, &commit, filename).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::symlink::SymlinkProbe;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn new_blob_store(dir: &Path) -> BlobStore {
        BlobStore::new(dir, Arc::new(SymlinkProbe::new()))
    }

    fn test_config(endpoint: &str) -> HubConfig {
        HubConfig::builder().endpoint(endpoint).build()
    }

    #[tokio::test]
    async fn force_download_with_local_files_only_is_invalid_usage() {
        let cache_dir = tempfile::tempdir().unwrap();
        let session = HttpSession::new();
        let config = test_config("https://hub.test");
        let blob_store = new_blob_store(cache_dir.path());
        let mirror = LocalDirMirror::new();
        let repo = RepoId::model("org/model");

        let request = FileRequest {
            repo: &repo,
            filename: "config.json",
            revision: "main",
            local_dir: None,
            force_download: true,
            local_files_only: true,
        };

        let err = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidUsage(_)));
    }

    #[tokio::test]
    async fn downloads_and_then_short_circuits_on_hash_revision() {
        let cache_dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let commit = "a".repeat(40);
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Repo-Commit", commit.as_str())
                    .insert_header("ETag", "\"etag1\"")
                    .insert_header("Content-Length", "5"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let config = test_config(&server.uri());
        let blob_store = new_blob_store(cache_dir.path());
        let mirror = LocalDirMirror::new();
        let repo = RepoId::model("org/model");

        let request = FileRequest {
            repo: &repo,
            filename: "config.json",
            revision: &commit,
            local_dir: None,
            force_download: false,
            local_files_only: false,
        };
        let pointer = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap();
        assert_eq!(fs_err::tokio::read(&pointer).await.unwrap(), b"hello");

        // Second call with the hash revision must not issue any request at
        // all; the mock server would otherwise need a second expectation.
        let pointer2 = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap();
        assert_eq!(pointer, pointer2);
    }

    #[tokio::test]
    async fn local_files_only_returns_cached_copy_without_network() {
        let cache_dir = tempfile::tempdir().unwrap();
        let blob_store = new_blob_store(cache_dir.path());
        let repo = RepoId::model("org/model");
        let commit = "b".repeat(40);
        blob_store.update_ref(&repo, "main", &commit).await.unwrap();

        let pointer_path =
            crate::path::pointer_path(&blob_store.repo_root(&repo), &commit, "config.json").unwrap();
        fs_err::tokio::create_dir_all(pointer_path.parent().unwrap()).await.unwrap();
        fs_err::tokio::write(&pointer_path, b"cached").await.unwrap();

        let session = HttpSession::new();
        let config = test_config("https://unreachable.invalid");
        let mirror = LocalDirMirror::new();
        let request = FileRequest {
            repo: &repo,
            filename: "config.json",
            revision: "main",
            local_dir: None,
            force_download: false,
            local_files_only: true,
        };

        let pointer = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap();
        assert_eq!(fs_err::tokio::read(&pointer).await.unwrap(), b"cached");
    }

    #[tokio::test]
    async fn local_files_only_without_cache_hit_is_local_entry_not_found() {
        let cache_dir = tempfile::tempdir().unwrap();
        let blob_store = new_blob_store(cache_dir.path());
        let repo = RepoId::model("org/model");

        let session = HttpSession::new();
        let config = test_config("https://unreachable.invalid");
        let mirror = LocalDirMirror::new();
        let request = FileRequest {
            repo: &repo,
            filename: "config.json",
            revision: "main",
            local_dir: None,
            force_download: false,
            local_files_only: true,
        };

        let err = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::LocalEntryNotFound { .. }));
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_cached_copy_when_present() {
        let cache_dir = tempfile::tempdir().unwrap();
        let blob_store = new_blob_store(cache_dir.path());
        let repo = RepoId::model("org/model");
        let commit = "c".repeat(40);
        blob_store.update_ref(&repo, "main", &commit).await.unwrap();
        let pointer_path =
            crate::path::pointer_path(&blob_store.repo_root(&repo), &commit, "weights.bin").unwrap();
        fs_err::tokio::create_dir_all(pointer_path.parent().unwrap()).await.unwrap();
        fs_err::tokio::write(&pointer_path, b"cached-bytes").await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let mut config = test_config(&server.uri());
        config.etag_timeout = Duration::from_millis(500);
        let mirror = LocalDirMirror::new();
        let request = FileRequest {
            repo: &repo,
            filename: "weights.bin",
            revision: "main",
            local_dir: None,
            force_download: false,
            local_files_only: false,
        };

        let pointer = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap();
        assert_eq!(fs_err::tokio::read(&pointer).await.unwrap(), b"cached-bytes");
    }

    #[tokio::test]
    async fn local_dir_request_delegates_to_the_mirror_with_a_single_probe() {
        let cache_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let commit = "e".repeat(40);
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Repo-Commit", commit.as_str())
                    .insert_header("ETag", "\"etag9\"")
                    .insert_header("Content-Length", "5"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"world".to_vec()))
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let config = test_config(&server.uri());
        let blob_store = new_blob_store(cache_dir.path());
        let mirror = LocalDirMirror::new();
        let repo = RepoId::model("org/model");

        let request = FileRequest {
            repo: &repo,
            filename: "config.json",
            revision: "main",
            local_dir: Some(local_dir.path()),
            force_download: false,
            local_files_only: false,
        };
        let path = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap();
        assert_eq!(fs_err::tokio::read(&path).await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn entry_not_found_probe_marks_no_exist_and_updates_ref() {
        let cache_dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let commit = "f".repeat(40);
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("X-Error-Code", "EntryNotFound")
                    .insert_header("X-Repo-Commit", commit.as_str()),
            )
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let config = test_config(&server.uri());
        let blob_store = new_blob_store(cache_dir.path());
        let mirror = LocalDirMirror::new();
        let repo = RepoId::model("org/model");

        let request = FileRequest {
            repo: &repo,
            filename: "missing.bin",
            revision: "main",
            local_dir: None,
            force_download: false,
            local_files_only: false,
        };

        let err = download_file(&session, &config, &blob_store, &mirror, None, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::LocalEntryNotFound { .. }));
        assert!(
            blob_store
                .is_marked_no_exist(&repo, &commit, "missing.bin")
                .await
                .unwrap()
        );
        assert_eq!(blob_store.read_ref(&repo, "main").await, Some(commit));
    }

    #[tokio::test]
    async fn try_to_load_from_cache_distinguishes_absent_from_uncached() {
        let cache_dir = tempfile::tempdir().unwrap();
        let blob_store = new_blob_store(cache_dir.path());
        let repo = RepoId::model("org/model");
        let commit = "d".repeat(40);

        assert_eq!(
            try_to_load_from_cache(&blob_store, &repo, "missing.bin", &commit)
                .await
                .unwrap(),
            None
        );

        blob_store.mark_no_exist(&repo, &commit, "missing.bin").await.unwrap();
        assert_eq!(
            try_to_load_from_cache(&blob_store, &repo, "missing.bin", &commit)
                .await
                .unwrap(),
            None
        );

        let pointer_path = crate::path::pointer_path(&blob_store.repo_root(&repo), &commit, "present.bin").unwrap();
        fs_err::tokio::create_dir_all(pointer_path.parent().unwrap()).await.unwrap();
        fs_err::tokio::write(&pointer_path, b"x").await.unwrap();
        assert_eq!(
            try_to_load_from_cache(&blob_store, &repo, "present.bin", &commit)
                .await
                .unwrap(),
            Some(pointer_path)
        );
    }
}
