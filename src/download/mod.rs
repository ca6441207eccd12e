//! Single-File Coordinator (C10) and Snapshot Coordinator (C11): orchestrate
//! the lower-level components to produce paths for one file or a whole
//! repository snapshot.

pub mod file;
pub mod snapshot;

pub use file::{FileRequest, download_file, try_to_load_from_cache};
pub use snapshot::{SnapshotRequest, snapshot_download};
