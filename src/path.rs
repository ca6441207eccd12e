//! Path & Layout (C1): cache/local paths, pointer paths, lock paths,
//! repo-folder names, and path-safety enforcement.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha1::{Digest, Sha1};

use crate::error::HubError;
use crate::types::{RepoId, RepoType};

const SEP: &str = "--";

/// The on-disk folder name for a repository: `<kind>s--<owner>--<name>`.
/// Single-level, never nested; slashes in the id become `SEP`.
pub fn repo_folder(repo: &RepoId) -> String {
    format!("{}{SEP}{}", repo.kind.plural(), repo.id.replace('/', SEP))
}

pub fn repo_root(cache_dir: &Path, repo: &RepoId) -> PathBuf {
    cache_dir.join(repo_folder(repo))
}

/// A resolved cache directory, for callers that want a repo's on-disk root
/// without reimplementing the folder-name encoding themselves.
#[derive(Debug, Clone)]
pub struct CacheRoot(PathBuf);

impl CacheRoot {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self(cache_dir.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn repo_path(&self, repo: &RepoId) -> PathBuf {
        repo_root(&self.0, repo)
    }
}

pub fn blobs_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("blobs")
}

pub fn blob_path(repo_root: &Path, etag: &str) -> PathBuf {
    blobs_dir(repo_root).join(etag)
}

pub fn incomplete_blob_path(repo_root: &Path, etag: &str) -> PathBuf {
    blobs_dir(repo_root).join(format!("{etag}.incomplete"))
}

pub fn refs_path(repo_root: &Path, revision: &str) -> PathBuf {
    repo_root.join("refs").join(revision)
}

pub fn lock_path(cache_dir: &Path, repo: &RepoId, etag: &str) -> PathBuf {
    cache_dir
        .join(".locks")
        .join(repo_folder(repo))
        .join(format!("{etag}.lock"))
}

pub fn no_exist_path(repo_root: &Path, commit: &str, rel: &str) -> Result<PathBuf, HubError> {
    joined_under(&repo_root.join(".no_exist").join(commit), rel)
}

/// The pointer path `<storage>/snapshots/<commit>/<rel>`. `storage` is the
/// repository root. Rejects results that escape `snapshots/` once joined
/// and normalized, and rejects `..` path segments outright.
pub fn pointer_path(repo_root: &Path, commit: &str, rel: &str) -> Result<PathBuf, HubError> {
    joined_under(&repo_root.join("snapshots").join(commit), rel)
}

/// Join `rel` (server-supplied, `/`-separated) onto `base`, rejecting any
/// result that is not strictly contained within `base`.
fn joined_under(base: &Path, rel: &str) -> Result<PathBuf, HubError> {
    if rel.split('/').any(|seg| seg == "..") {
        return Err(HubError::InvalidPath(format!(
            "path contains '..' segment: {rel}"
        )));
    }
    let mut joined = base.to_path_buf();
    for segment in rel.split('/') {
        if segment.is_empty() {
            continue;
        }
        joined.push(segment);
    }
    if !joined.starts_with(base) {
        return Err(HubError::InvalidPath(format!(
            "resolved path escapes its parent: {rel}"
        )));
    }
    Ok(with_extended_prefix(joined))
}

/// On Windows, paths beyond 255 characters need the `\\?\` extended-path
/// marker to avoid the 260-character `MAX_PATH` limit. A no-op elsewhere.
#[cfg(windows)]
fn with_extended_prefix(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 255 && !s.starts_with(r"\\?\") {
        PathBuf::from(format!(r"\\?\{s}"))
    } else {
        path
    }
}

#[cfg(not(windows))]
fn with_extended_prefix(path: PathBuf) -> PathBuf {
    path
}

/// Paths for the local-directory mirror: the sidecar metadata file, its
/// lock, and an incomplete-download path disambiguated per etag.
pub struct LocalPaths {
    pub file: PathBuf,
    pub metadata: PathBuf,
    pub lock: PathBuf,
}

pub fn local_paths(local_dir: &Path, filename: &str) -> LocalPaths {
    let sidecar_dir = local_dir.join(".cache").join("huggingface").join("download");
    let file = local_dir.join(filename);
    let metadata = sidecar_dir.join(format!("{filename}.metadata"));
    let lock = sidecar_dir.join(format!("{filename}.metadata.lock"));
    LocalPaths { file, metadata, lock }
}

/// `<short-hash-of-metadata-basename>.<etag>.incomplete`, disambiguating
/// concurrent partial downloads of the same filename under different etags.
/// The short hash is URL-safe base64 of the SHA-1 of the metadata basename.
pub fn incomplete_local_path(metadata_path: &Path, etag: &str) -> PathBuf {
    let basename = metadata_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(basename.as_bytes());
    let short_hash = URL_SAFE_NO_PAD.encode(hasher.finalize());
    metadata_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{short_hash}.{etag}.incomplete"))
}

pub fn gitignore_path(local_dir: &Path) -> PathBuf {
    local_dir.join(".cache").join("huggingface").join("download").join(".gitignore")
}

pub fn url_prefix(kind: RepoType) -> &'static str {
    kind.url_prefix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepoId;

    #[test]
    fn cache_root_repo_path_matches_repo_root() {
        let root = CacheRoot::new("/cache");
        let repo = RepoId::model("owner/name");
        assert_eq!(root.repo_path(&repo), repo_root(Path::new("/cache"), &repo));
    }

    #[test]
    fn repo_folder_encoding() {
        let repo = RepoId::model("owner/name");
        assert_eq!(repo_folder(&repo), "models--owner--name");

        let ds = RepoId::dataset("foo/bar");
        assert_eq!(repo_folder(&ds), "datasets--foo--bar");
    }

    #[test]
    fn pointer_path_rejects_dotdot() {
        let root = Path::new("/cache/models--a--b");
        let err = pointer_path(root, "deadbeef", "../../etc/passwd").unwrap_err();
        assert!(matches!(err, HubError::InvalidPath(_)));
    }

    #[test]
    fn pointer_path_joins_server_slashes() {
        let root = Path::new("/cache/models--a--b");
        let p = pointer_path(root, "deadbeef", "sub/dir/file.bin").unwrap();
        assert_eq!(
            p,
            Path::new("/cache/models--a--b/snapshots/deadbeef/sub/dir/file.bin")
        );
    }

    #[test]
    fn incomplete_local_path_is_stable_and_disambiguates_by_etag() {
        let meta = Path::new("/home/u/model/.cache/huggingface/download/config.json.metadata");
        let a = incomplete_local_path(meta, "etag1");
        let b = incomplete_local_path(meta, "etag2");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".etag1.incomplete"));
    }

    #[test]
    fn local_paths_layout() {
        let dir = Path::new("/repo");
        let paths = local_paths(dir, "config.json");
        assert_eq!(paths.file, Path::new("/repo/config.json"));
        assert_eq!(
            paths.metadata,
            Path::new("/repo/.cache/huggingface/download/config.json.metadata")
        );
    }
}
