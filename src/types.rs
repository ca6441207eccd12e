//! Core data model: repository identity, revisions, etags, siblings.

use std::fmt;

/// The three kinds of repository this Hub hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoType {
    Model,
    Dataset,
    Space,
}

impl RepoType {
    /// The plural noun used in on-disk folder names (`models`, `datasets`, `spaces`).
    pub fn plural(self) -> &'static str {
        match self {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
            RepoType::Space => "spaces",
        }
    }

    /// The URL path prefix used by resolve/API URLs (empty for models).
    pub fn url_prefix(self) -> &'static str {
        match self {
            RepoType::Model => "",
            RepoType::Dataset => "datasets/",
            RepoType::Space => "spaces/",
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// A repository identifier, e.g. `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub kind: RepoType,
    pub id: String,
}

impl RepoId {
    pub fn new(kind: RepoType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn model(id: impl Into<String>) -> Self {
        Self::new(RepoType::Model, id)
    }

    pub fn dataset(id: impl Into<String>) -> Self {
        Self::new(RepoType::Dataset, id)
    }

    pub fn space(id: impl Into<String>) -> Self {
        Self::new(RepoType::Space, id)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A revision: either a 40-hex commit hash or a symbolic name (branch/tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A revision is a commit hash iff it is exactly 40 lowercase hex digits.
    pub fn is_commit_hash(&self) -> bool {
        is_commit_hash(&self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A normalized content etag. LFS etags are 64-hex SHA-256; git-tracked
/// etags are 40-hex git object hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Etag(String);

impl Etag {
    /// Strip a leading `W/` weak-validator marker and surrounding quotes.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        let without_weak = trimmed.strip_prefix("W/").unwrap_or(trimmed);
        let unquoted = without_weak
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(without_weak);
        Self(unquoted.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// LFS-tracked content has a SHA-256 etag: 64 hex digits.
    pub fn looks_like_sha256(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file entry belonging to a repository at a given revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub rfilename: String,
    pub size: Option<u64>,
    pub oid: Option<String>,
    pub is_lfs: bool,
}

/// Projection shared by model/dataset/space info responses: just enough
/// for the snapshot coordinator to drive downloads.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub sha: String,
    pub siblings: Vec<Sibling>,
}
