//! Per-cache-directory symlink-support probe, memoized once per directory
//! for the lifetime of the process (§5: "per-cache symlink-support
//! decisions are memoized per cache directory").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct SymlinkProbe {
    cache: Mutex<HashMap<PathBuf, bool>>,
}

impl SymlinkProbe {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Determines (once per `repo_root`, caching the result) whether the
    /// volume hosting `repo_root` supports symlinks, by attempting to
    /// create one inside a temporary subdirectory.
    pub async fn supports_symlinks(&self, repo_root: &Path) -> std::io::Result<bool> {
        if let Some(cached) = self.cache.lock().expect("symlink probe lock poisoned").get(repo_root) {
            return Ok(*cached);
        }

        let probe_dir = repo_root.join(".symlink_probe");
        fs_err::tokio::create_dir_all(&probe_dir).await?;
        let target = probe_dir.join("target");
        let link = probe_dir.join("link");
        fs_err::tokio::write(&target, b"x").await?;

        let supported = symlink(&target, &link).await.is_ok();

        let _ = fs_err::tokio::remove_dir_all(&probe_dir).await;

        self.cache
            .lock()
            .expect("symlink probe lock poisoned")
            .insert(repo_root.to_path_buf(), supported);
        Ok(supported)
    }
}

impl Default for SymlinkProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}

/// Discover the cache directory's default file mode by creating a
/// throwaway temp file and inspecting it (the process umask is not
/// readable safely from a multi-threaded program).
#[cfg(unix)]
pub async fn default_mode(repo_root: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let probe = repo_root.join(".mode_probe");
    fs_err::tokio::write(&probe, b"").await?;
    let mode = fs_err::tokio::metadata(&probe).await?.permissions().mode();
    let _ = fs_err::tokio::remove_file(&probe).await;
    Ok(mode)
}

#[cfg(not(unix))]
pub async fn default_mode(_repo_root: &Path) -> std::io::Result<u32> {
    Ok(0o644)
}
