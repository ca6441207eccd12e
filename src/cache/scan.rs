//! `scan_cache_dir`: read-only inventory over a cache root, supplementing
//! the core spec with the `du`-like housekeeping query every cache-backed
//! tool eventually grows. Never mutates or deletes anything.

use std::path::{Path, PathBuf};

use crate::error::HubError;

#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub commit: String,
    pub file_count: usize,
}

#[derive(Debug, Clone)]
pub struct RepoCacheInfo {
    pub repo_folder: String,
    pub path: PathBuf,
    pub size_on_disk: u64,
    pub revisions: Vec<RevisionInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    pub repos: Vec<RepoCacheInfo>,
}

impl CacheInfo {
    pub fn total_size_on_disk(&self) -> u64 {
        self.repos.iter().map(|r| r.size_on_disk).sum()
    }
}

/// Enumerates repos, revisions, and blob sizes under a cache root.
pub async fn scan_cache_dir(cache_dir: &Path) -> Result<CacheInfo, HubError> {
    let mut repos = Vec::new();
    let mut entries = match fs_err::tokio::read_dir(cache_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CacheInfo::default());
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == ".locks" {
            continue;
        }
        let repo_path = entry.path();
        let size = dir_size(&repo_path.join("blobs")).await.unwrap_or(0);
        let revisions = scan_revisions(&repo_path).await?;
        repos.push(RepoCacheInfo {
            repo_folder: name,
            path: repo_path,
            size_on_disk: size,
            revisions,
        });
    }

    Ok(CacheInfo { repos })
}

async fn scan_revisions(repo_path: &Path) -> Result<Vec<RevisionInfo>, HubError> {
    let snapshots_dir = repo_path.join("snapshots");
    let mut revisions = Vec::new();
    let mut entries = match fs_err::tokio::read_dir(&snapshots_dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(revisions),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let commit = entry.file_name().to_string_lossy().to_string();
        let file_count = count_files(&entry.path()).await.unwrap_or(0);
        revisions.push(RevisionInfo { commit, file_count });
    }
    Ok(revisions)
}

async fn count_files(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let mut entries = fs_err::tokio::read_dir(&d).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

async fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let mut entries = fs_err::tokio::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            total += entry.metadata().await?.len();
        }
    }
    Ok(total)
}
