//! Environment-driven configuration, following the recognized variables
//! table: endpoint, cache layout roots, auth token resolution, timeouts,
//! and feature toggles.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ETAG_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub endpoint: String,
    pub home: PathBuf,
    pub cache_dir: PathBuf,
    pub token: Option<String>,
    pub token_path: PathBuf,
    pub disable_symlinks_warning: bool,
    pub disable_implicit_token: bool,
    pub enable_hf_transfer: bool,
    pub disable_xet: bool,
    pub etag_timeout: Duration,
    pub download_timeout: Duration,
    pub offline: bool,
}

impl HubConfig {
    /// Build configuration from the process environment, honoring legacy
    /// variable aliases (the non-legacy name always takes precedence).
    pub fn from_env() -> Self {
        let endpoint = env::var("HF_ENDPOINT")
            .unwrap_or_else(|_| "https://huggingface.co".to_string())
            .trim_end_matches('/')
            .to_string();

        let home = env::var_os("HF_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_home);

        let cache_dir = env::var_os("HF_HUB_CACHE")
            .or_else(|| env::var_os("HUGGINGFACE_HUB_CACHE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("hub"));

        let token = env::var("HF_TOKEN")
            .ok()
            .or_else(|| env::var("HUGGING_FACE_HUB_TOKEN").ok())
            .filter(|s| !s.is_empty());

        if token.is_none() {
            tracing::debug!("no HF_TOKEN/HUGGING_FACE_HUB_TOKEN set; requests will be unauthenticated");
        }

        let token_path = env::var_os("HF_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("token"));

        let etag_timeout = env::var("HF_HUB_ETAG_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_ETAG_TIMEOUT_SECS));

        let download_timeout = env::var("HF_HUB_DOWNLOAD_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS));

        Self {
            endpoint,
            home,
            cache_dir,
            token,
            token_path,
            disable_symlinks_warning: env_flag("HF_HUB_DISABLE_SYMLINKS_WARNING"),
            disable_implicit_token: env_flag("HF_HUB_DISABLE_IMPLICIT_TOKEN"),
            enable_hf_transfer: env_flag("HF_HUB_ENABLE_HF_TRANSFER"),
            disable_xet: env_flag("HF_HUB_DISABLE_XET"),
            etag_timeout,
            download_timeout,
            offline: env_flag("HF_HUB_OFFLINE"),
        }
    }

    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder {
            config: Self::from_env(),
        }
    }

    /// Resolve the token to send with a request, honoring the implicit-token
    /// opt-out and an explicit per-call override.
    pub fn effective_token(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(t) = explicit {
            return Some(t.to_string());
        }
        if self.disable_implicit_token {
            return None;
        }
        self.token.clone()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Builder for embedding applications that want to override resolved
/// values, e.g. pointing `endpoint` at a mock server in tests.
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    pub fn build(self) -> HubConfig {
        self.config
    }
}

fn default_home() -> PathBuf {
    home_dir().join(".cache").join("huggingface")
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Case-insensitive boolean env var parse, per the recognized variables table.
fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}
