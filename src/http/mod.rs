//! HTTP plumbing: shared session (C3), retry/backoff wrapper (C4), error
//! classification (C5), metadata probing (C6), and byte transport (C7).

pub mod backoff;
pub mod classify;
pub mod metadata;
pub mod session;
pub mod transport;

pub use backoff::{BackoffPolicy, backoff};
pub use classify::classify_error;
pub use metadata::{FileMetadata, head_metadata};
pub use session::HttpSession;
pub use transport::{expected_length_from_headers, http_get};
