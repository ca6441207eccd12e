//! A cached file-download engine for a model/dataset/space Hub: resolves a
//! `(repo, revision, filename)` tuple to a stable local path, downloading
//! and resuming as needed, and reusing a content-addressed blob cache
//! across revisions that share files.
//!
//! [`Client`] is the entry point most embedders want; the lower-level
//! components (`path`, `lock`, `http`, `cache`, `download`, `api`) are all
//! public for callers that need to compose their own pipeline.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod lock;
pub mod path;
pub mod types;

pub use cache::{CacheInfo, scan_cache_dir};
pub use client::{Client, DownloadOptions, SnapshotOptions, TokenArg};
pub use config::HubConfig;
pub use download::{FileRequest, SnapshotRequest, download_file, snapshot_download, try_to_load_from_cache};
pub use error::HubError;
pub use path::CacheRoot;
pub use types::{RepoId, RepoType};
