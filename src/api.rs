//! External collaborators (§6): repository metadata, recursive tree
//! listing, auth token resolution, and accelerated transports, each
//! modeled as a trait with one default HTTP-backed implementation. Retry
//! lives in the backoff wrapper (C4); these functions issue one request
//! (or one paginated series) and classify failures via C5.

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::io::AsyncWrite;

use crate::error::HubError;
use crate::http::backoff::{BackoffPolicy, backoff};
use crate::http::classify::classify_error;
use crate::http::metadata::XetDescriptor;
use crate::http::session::HttpSession;
use crate::types::{RepoId, RepoInfo, Sibling};

/// Resolves `{sha, siblings[]}` for a repository at a revision.
#[async_trait]
pub trait RepoMetadataApi: Send + Sync {
    async fn repo_info(&self, repo: &RepoId, revision: &str) -> Result<RepoInfo, HubError>;
}

/// Streams the recursive file tree for repositories whose sibling list is
/// too large for the plain repo-info response, following `Link: rel="next"`
/// pagination.
#[async_trait]
pub trait TreeListingApi: Send + Sync {
    async fn list_tree(&self, repo: &RepoId, revision: &str) -> Result<Vec<Sibling>, HubError>;
}

/// Resolves the token to attach to outgoing requests, if any.
pub trait AuthSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A multi-connection or content-defined-chunked downloader offered as an
/// alternative to the basic byte transport (C7). Implementations must
/// uphold the same expected-size postcondition as `http::transport::http_get`.
#[async_trait]
pub trait AcceleratedTransport: Send + Sync {
    /// Whether this transport wants to handle a download described by an
    /// optional xet descriptor (from the metadata probe).
    fn wants(&self, xet: Option<&XetDescriptor>) -> bool;

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        headers: HeaderMap,
        expected_size: u64,
    ) -> Result<(), HubError>;
}

/// Declines every download; selected when no turbo/xet crate is linked in.
/// The spec marks their internals out of scope and none appear anywhere in
/// the corpus, so C7's basic transport is always the fallback.
pub struct DisabledTransport;

#[async_trait]
impl AcceleratedTransport for DisabledTransport {
    fn wants(&self, _xet: Option<&XetDescriptor>) -> bool {
        false
    }

    async fn download(
        &self,
        _url: &str,
        _sink: &mut (dyn AsyncWrite + Unpin + Send),
        _headers: HeaderMap,
        _expected_size: u64,
    ) -> Result<(), HubError> {
        Err(HubError::InvalidUsage(
            "DisabledTransport never accepts a download".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SiblingResponse {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    lfs: Option<serde_json::Value>,
}

impl From<SiblingResponse> for Sibling {
    fn from(s: SiblingResponse) -> Self {
        Self {
            rfilename: s.rfilename,
            size: s.size,
            oid: s.oid,
            is_lfs: s.lfs.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoInfoResponse {
    sha: String,
    #[serde(default)]
    siblings: Vec<SiblingResponse>,
}

/// Default, HTTP-backed metadata API talking to `/api/<kind>s/<repo_id>`.
pub struct HttpRepoMetadataApi<'a> {
    pub session: &'a HttpSession,
    pub endpoint: &'a str,
    pub auth_header: Option<&'a str>,
}

#[async_trait]
impl RepoMetadataApi for HttpRepoMetadataApi<'_> {
    async fn repo_info(&self, repo: &RepoId, revision: &str) -> Result<RepoInfo, HubError> {
        let url = format!(
            "{}/api/{}s/{}/revision/{}",
            self.endpoint,
            repo.kind.plural(),
            repo.id,
            url_escape_revision(revision),
        );

        let session = self.session;
        let auth_header = self.auth_header;
        let response = backoff(session, &BackoffPolicy::default(), || {
            let mut builder = session.client().get(&url);
            if let Some(token) = auth_header {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }
            builder.send()
        })
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let body: Option<serde_json::Value> = response.json().await.ok();
            return Err(classify_error(status, &headers, body.as_ref(), &repo.to_string(), &url, None));
        }

        let parsed: RepoInfoResponse = response.json().await.map_err(HubError::Request)?;
        Ok(RepoInfo {
            sha: parsed.sha,
            siblings: parsed.siblings.into_iter().map(Sibling::from).collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    lfs: Option<serde_json::Value>,
}

/// Default, HTTP-backed recursive tree listing, for repositories whose
/// sibling count exceeds 50,000 and would otherwise be truncated by the
/// plain repo-info response.
pub struct HttpTreeListingApi<'a> {
    pub session: &'a HttpSession,
    pub endpoint: &'a str,
    pub auth_header: Option<&'a str>,
}

#[async_trait]
impl TreeListingApi for HttpTreeListingApi<'_> {
    async fn list_tree(&self, repo: &RepoId, revision: &str) -> Result<Vec<Sibling>, HubError> {
        let mut siblings = Vec::new();
        let mut url = Some(format!(
            "{}/api/{}s/{}/tree/{}?recursive=true",
            self.endpoint,
            repo.kind.plural(),
            repo.id,
            url_escape_revision(revision),
        ));

        while let Some(next_url) = url.take() {
            let session = self.session;
            let auth_header = self.auth_header;
            let response = backoff(session, &BackoffPolicy::default(), || {
                let mut builder = session.client().get(&next_url);
                if let Some(token) = auth_header {
                    builder = builder.header("Authorization", format!("Bearer {token}"));
                }
                builder.send()
            })
            .await?;

            if !response.status().is_success() {
                let status = response.status();
                let headers = response.headers().clone();
                let body: Option<serde_json::Value> = response.json().await.ok();
                return Err(classify_error(status, &headers, body.as_ref(), &repo.to_string(), &next_url, None));
            }

            url = next_link(response.headers())?;
            let page: Vec<TreeEntry> = response.json().await.map_err(HubError::Request)?;
            siblings.extend(page.into_iter().filter(|e| e.kind == "file").map(|e| Sibling {
                rfilename: e.path,
                size: e.size,
                oid: e.oid,
                is_lfs: e.lfs.is_some(),
            }));
        }

        Ok(siblings)
    }
}

/// Extracts the `rel="next"` target from a `Link` header as a plain URL
/// string (Open Question #2: not JSON-decoded; a JSON-quoted value is
/// rejected rather than silently unquoted).
fn next_link(headers: &HeaderMap) -> Result<Option<String>, HubError> {
    let Some(raw) = headers.get("Link").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    for part in raw.split(',') {
        let part = part.trim();
        if !part.ends_with(r#"rel="next""#) {
            continue;
        }
        let Some(start) = part.find('<') else { continue };
        let Some(end) = part.find('>') else { continue };
        let value = &part[start + 1..end];
        if value.starts_with('"') && value.ends_with('"') {
            return Err(HubError::FileMetadataError {
                url: value.to_string(),
                reason: "pagination Link value looks JSON-quoted".to_string(),
            });
        }
        return Ok(Some(value.to_string()));
    }
    Ok(None)
}

fn url_escape_revision(revision: &str) -> String {
    revision.replace('/', "%2F")
}

/// Unreserved characters (RFC 3986) are left alone; everything else in a
/// filename segment — spaces, `#`, `?`, non-ASCII bytes — is percent-encoded.
const FILENAME_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Unlike the revision, a filename's `/` separators are real nested path
/// segments on the Hub and stay literal; each segment is percent-encoded
/// on its own.
fn url_escape_filename(filename: &str) -> String {
    filename
        .split('/')
        .map(|segment| utf8_percent_encode(segment, FILENAME_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve URL = `<endpoint>/<prefix><repo_id>/resolve/<escaped-revision>/<escaped-filename>`.
pub fn resolve_url(endpoint: &str, repo: &RepoId, revision: &str, filename: &str) -> String {
    format!(
        "{endpoint}/{}{}/resolve/{}/{}",
        repo.kind.url_prefix(),
        repo.id,
        url_escape_revision(revision),
        url_escape_filename(filename),
    )
}

/// Resolves a token from config-provided state (env var, explicit override,
/// or a token file), matching the §6 token-acceptance rule's non-`true`/
/// `false` branches; the boolean branches are handled by the caller before
/// constructing this.
pub struct StaticAuthSource(pub Option<String>);

impl AuthSource for StaticAuthSource {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
