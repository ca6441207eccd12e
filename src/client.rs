//! Client facade: the long-lived handle applications construct once. Owns
//! the shared HTTP session (C3), the resolved configuration (§6), and the
//! `BlobStore`/`LocalDirMirror` built over it. `Client::download_file` and
//! `Client::snapshot_download` are thin wrappers over the free functions in
//! `download::file`/`download::snapshot`, adding token resolution (§6's
//! token-acceptance rule) and `HF_HUB_OFFLINE` enforcement.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{HttpRepoMetadataApi, HttpTreeListingApi};
use crate::cache::symlink::SymlinkProbe;
use crate::cache::{BlobStore, LocalDirMirror};
use crate::config::HubConfig;
use crate::download::file::{self, FileRequest};
use crate::download::snapshot::{self, SnapshotRequest};
use crate::error::HubError;
use crate::http::session::HttpSession;
use crate::path::CacheRoot;
use crate::types::RepoId;

/// How to resolve the auth token for one call, mirroring the Python
/// ecosystem's `token: bool | str | None` parameter: `Auto` is the
/// zero-configuration default.
#[derive(Debug, Clone, Default)]
pub enum TokenArg {
    #[default]
    Auto,
    Bool(bool),
    Explicit(String),
}

impl From<bool> for TokenArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for TokenArg {
    fn from(value: String) -> Self {
        Self::Explicit(value)
    }
}

impl From<&str> for TokenArg {
    fn from(value: &str) -> Self {
        Self::Explicit(value.to_string())
    }
}

/// Per-call options for `Client::download_file`. `Default` gives the
/// zero-configuration behavior: main revision, content-addressed cache,
/// cached token, resumable downloads.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions<'a> {
    pub revision: Option<&'a str>,
    pub local_dir: Option<&'a Path>,
    pub token: TokenArg,
    pub force_download: bool,
    pub local_files_only: bool,
}

/// Per-call options for `Client::snapshot_download`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions<'a> {
    pub revision: Option<&'a str>,
    pub local_dir: Option<&'a Path>,
    pub token: TokenArg,
    pub allow_patterns: &'a [String],
    pub ignore_patterns: &'a [String],
    pub force_download: bool,
    pub local_files_only: bool,
    pub max_workers: Option<usize>,
}

pub struct Client {
    session: HttpSession,
    config: HubConfig,
    blob_store: BlobStore,
    local_mirror: LocalDirMirror,
}

impl Client {
    pub fn new(config: HubConfig) -> Self {
        let symlink_probe = Arc::new(SymlinkProbe::new());
        let blob_store = BlobStore::new(config.cache_dir.clone(), symlink_probe);
        Self {
            session: HttpSession::new(),
            config,
            blob_store,
            local_mirror: LocalDirMirror::new(),
        }
    }

    /// Builds a client from the process environment (`HF_ENDPOINT`,
    /// `HF_HOME`, `HF_HUB_CACHE`, ...).
    pub fn from_env() -> Self {
        Self::new(HubConfig::from_env())
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The resolved cache root, for callers that want a repo's on-disk path
    /// without reimplementing the folder-name encoding.
    pub fn cache_root(&self) -> CacheRoot {
        CacheRoot::new(self.config.cache_dir.clone())
    }

    pub async fn download_file(
        &self,
        repo: &RepoId,
        filename: &str,
        options: &DownloadOptions<'_>,
    ) -> Result<PathBuf, HubError> {
        let auth_header = self.resolve_token(&options.token).await?;
        let local_files_only = self.config.offline || options.local_files_only;
        let request = FileRequest {
            repo,
            filename,
            revision: options.revision.unwrap_or("main"),
            local_dir: options.local_dir,
            force_download: options.force_download,
            local_files_only,
        };

        let result = file::download_file(
            &self.session,
            &self.config,
            &self.blob_store,
            &self.local_mirror,
            auth_header.as_deref(),
            &request,
        )
        .await;

        self.map_offline(result, self.config.offline && !options.local_files_only)
    }

    pub async fn snapshot_download(
        &self,
        repo: &RepoId,
        options: &SnapshotOptions<'_>,
    ) -> Result<PathBuf, HubError> {
        let auth_header = self.resolve_token(&options.token).await?;
        let local_files_only = self.config.offline || options.local_files_only;
        let repo_metadata_api = HttpRepoMetadataApi {
            session: &self.session,
            endpoint: &self.config.endpoint,
            auth_header: auth_header.as_deref(),
        };
        let tree_listing_api = HttpTreeListingApi {
            session: &self.session,
            endpoint: &self.config.endpoint,
            auth_header: auth_header.as_deref(),
        };
        let request = SnapshotRequest {
            repo,
            revision: options.revision.unwrap_or("main"),
            local_dir: options.local_dir,
            allow_patterns: options.allow_patterns,
            ignore_patterns: options.ignore_patterns,
            force_download: options.force_download,
            local_files_only,
            max_workers: options.max_workers,
        };

        let result = snapshot::snapshot_download(
            &self.session,
            &self.config,
            &self.blob_store,
            &self.local_mirror,
            &repo_metadata_api,
            &tree_listing_api,
            auth_header.as_deref(),
            &request,
        )
        .await;

        self.map_offline(result, self.config.offline && !options.local_files_only)
    }

    /// Pure, offline, no-network lookup for an already-cached file.
    pub async fn try_to_load_from_cache(
        &self,
        repo: &RepoId,
        filename: &str,
        revision: &str,
    ) -> Result<Option<PathBuf>, HubError> {
        file::try_to_load_from_cache(&self.blob_store, repo, filename, revision).await
    }

    /// Promotes a `LocalEntryNotFound` to `OfflineModeEnabled` when the
    /// fallback was entered only because `HF_HUB_OFFLINE` forced it (as
    /// opposed to the caller having asked for `local_files_only` directly),
    /// so the two causes stay distinguishable to the caller.
    fn map_offline<T>(&self, result: Result<T, HubError>, offline_forced: bool) -> Result<T, HubError> {
        match result {
            Err(HubError::LocalEntryNotFound { .. }) if offline_forced => Err(HubError::OfflineModeEnabled),
            other => other,
        }
    }

    async fn resolve_token(&self, token: &TokenArg) -> Result<Option<String>, HubError> {
        match token {
            TokenArg::Explicit(value) => Ok(Some(value.clone())),
            TokenArg::Bool(false) => Ok(None),
            TokenArg::Bool(true) => Ok(Some(self.read_token_file().await?)),
            TokenArg::Auto => Ok(self.config.effective_token(None)),
        }
    }

    async fn read_token_file(&self) -> Result<String, HubError> {
        let text = fs_err::tokio::read_to_string(&self.config.token_path)
            .await
            .map_err(|e| {
                HubError::LocalTokenNotFound(format!(
                    "could not read token file {}: {e}",
                    self.config.token_path.display()
                ))
            })?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(HubError::LocalTokenNotFound(format!(
                "token file {} is empty",
                self.config.token_path.display()
            )));
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(endpoint: &str, cache_dir: &Path) -> Client {
        let config = HubConfig::builder().endpoint(endpoint).cache_dir(cache_dir).build();
        Client::new(config)
    }

    #[tokio::test]
    async fn download_file_round_trips_through_the_content_cache() {
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

        let cache_dir = tempfile::tempdir().unwrap();
        let client = test_client(&server.uri(), cache_dir.path());
        let repo = RepoId::model("org/model");
        let options = DownloadOptions {
            revision: Some("main"),
            ..Default::default()
        };

        let path = client.download_file(&repo, "config.json", &options).await.unwrap();
        assert_eq!(fs_err::tokio::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn bool_false_token_never_sends_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Repo-Commit", "b".repeat(40).as_str())
                    .insert_header("ETag", "\"etag2\"")
                    .insert_header("Content-Length", "3"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let mut config = HubConfig::builder().endpoint(&server.uri()).cache_dir(cache_dir.path()).build();
        config.token = Some("should-not-be-sent".to_string());
        let client = Client::new(config);
        let repo = RepoId::model("org/model");
        let options = DownloadOptions {
            token: TokenArg::Bool(false),
            ..Default::default()
        };

        client.download_file(&repo, "weights.bin", &options).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| !r.headers.contains_key("authorization")));
    }

    #[tokio::test]
    async fn offline_config_maps_cache_miss_to_offline_mode_enabled() {
        let cache_dir = tempfile::tempdir().unwrap();
        let config = HubConfig::builder()
            .endpoint("https://unreachable.invalid")
            .cache_dir(cache_dir.path())
            .offline(true)
            .build();
        let client = Client::new(config);
        let repo = RepoId::model("org/model");
        let options = DownloadOptions::default();

        let err = client.download_file(&repo, "config.json", &options).await.unwrap_err();
        assert!(matches!(err, HubError::OfflineModeEnabled));
    }

    #[tokio::test]
    async fn explicit_local_files_only_keeps_local_entry_not_found() {
        let cache_dir = tempfile::tempdir().unwrap();
        let client = test_client("https://unreachable.invalid", cache_dir.path());
        let repo = RepoId::model("org/model");
        let options = DownloadOptions {
            local_files_only: true,
            ..Default::default()
        };

        let err = client.download_file(&repo, "config.json", &options).await.unwrap_err();
        assert!(matches!(err, HubError::LocalEntryNotFound { .. }));
    }

    #[tokio::test]
    async fn cache_root_repo_path_matches_the_blob_store() {
        let cache_dir = tempfile::tempdir().unwrap();
        let client = test_client("https://hub.test", cache_dir.path());
        let repo = RepoId::model("org/model");
        assert_eq!(client.cache_root().repo_path(&repo), client.blob_store.repo_root(&repo));
    }
}
