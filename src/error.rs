//! The error taxonomy. Every variant corresponds to a classified failure
//! mode from the Hub metadata/transport layer; transient network faults are
//! retried internally by the backoff wrapper and never surface here unless
//! their retry budget is exhausted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no auth token found: {0}")]
    LocalTokenNotFound(String),

    #[error("offline mode is enabled (HF_HUB_OFFLINE) and no cached copy was found")]
    OfflineModeEnabled,

    #[error("{message}")]
    HubHttpError {
        message: String,
        server_messages: Vec<String>,
        request_id: Option<String>,
        status: Option<u16>,
    },

    #[error("repository not found: {repo}")]
    RepositoryNotFound { repo: String, request_id: Option<String> },

    #[error("access to repository {repo} is gated")]
    GatedRepo { repo: String, request_id: Option<String> },

    #[error("access to repository {repo} is disabled")]
    DisabledRepo { repo: String, request_id: Option<String> },

    #[error("revision not found: {revision} (repo {repo})")]
    RevisionNotFound { repo: String, revision: String },

    #[error("entry not found: {path} at revision {revision} (repo {repo})")]
    EntryNotFound {
        repo: String,
        revision: String,
        path: String,
    },

    #[error("{path} is not available locally and the network is unreachable: {reason}")]
    LocalEntryNotFound { path: String, reason: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("could not determine file metadata for {url}: {reason}")]
    FileMetadataError { url: String, reason: String },

    #[error(
        "downloaded size ({actual}) does not match expected size ({expected}) for {url}; retry with force_download"
    )]
    ConsistencyError {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("{size} bytes exceeds the {limit}-byte basic transport limit and no accelerated transport is available")]
    TransportTooLarge { size: u64, limit: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl HubError {
    /// Extract the request id carried by server-classified error variants.
    /// Returns None for variants that don't carry one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::HubHttpError { request_id, .. }
            | Self::RepositoryNotFound { request_id, .. }
            | Self::GatedRepo { request_id, .. }
            | Self::DisabledRepo { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Appends additional context to the message without losing the cause.
    pub fn with_context(self, extra: &str) -> Self {
        match self {
            Self::HubHttpError {
                message,
                server_messages,
                request_id,
                status,
            } => Self::HubHttpError {
                message: format!("{message} ({extra})"),
                server_messages,
                request_id,
                status,
            },
            other => other,
        }
    }

    /// Produce a sanitized error message safe for returning to embedding
    /// applications. Does not leak raw header dumps or request ids.
    pub fn client_message(&self) -> String {
        match self {
            Self::LocalTokenNotFound(_) => "no authentication token available".to_string(),
            Self::OfflineModeEnabled => {
                "offline mode is enabled and the file is not cached".to_string()
            }
            Self::HubHttpError { message, .. } => message.clone(),
            Self::RepositoryNotFound { repo, .. } => format!("repository not found: {repo}"),
            Self::GatedRepo { repo, .. } => format!("repository {repo} is gated"),
            Self::DisabledRepo { repo, .. } => format!("repository {repo} is disabled"),
            Self::RevisionNotFound { revision, .. } => format!("revision not found: {revision}"),
            Self::EntryNotFound { path, .. } => format!("file not found: {path}"),
            Self::LocalEntryNotFound { path, .. } => {
                format!("{path} is not cached and the network is unavailable")
            }
            Self::BadRequest { message } => message.clone(),
            Self::FileMetadataError { url, .. } => format!("could not fetch metadata for {url}"),
            Self::ConsistencyError { url, .. } => format!("incomplete download: {url}"),
            Self::TransportTooLarge { size, limit } => {
                format!("file is too large for basic transport ({size} bytes, limit {limit})")
            }
            Self::InvalidPath(_) => "invalid path".to_string(),
            Self::InvalidRange(_) => "invalid range request".to_string(),
            Self::InvalidUsage(m) => m.clone(),
            Self::Io(_) => "local I/O error".to_string(),
            Self::Request(_) => "request to the Hub failed".to_string(),
        }
    }

    /// True for errors that represent an authentic server refusal, as
    /// opposed to connectivity or offline causes. C10 propagates these
    /// unchanged rather than degrading to `LocalEntryNotFound`.
    pub fn is_authentic_refusal(&self) -> bool {
        matches!(
            self,
            Self::RepositoryNotFound { .. } | Self::GatedRepo { .. } | Self::DisabledRepo { .. }
        )
    }
}
