//! Metadata Probe (C6): HEAD with relative-redirect following, extracting
//! commit/etag/size/location and optional xet descriptor headers.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::error::HubError;
use crate::http::classify::classify_error;
use crate::types::Etag;

#[derive(Debug, Clone)]
pub struct XetDescriptor {
    pub file_hash: String,
    pub refresh_route: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub commit: String,
    pub etag: Etag,
    pub size: u64,
    pub location: String,
    pub xet: Option<XetDescriptor>,
}

/// Issues HEAD with redirects disabled at the transport layer, manually
/// following *relative* redirects (same-origin, no host). Absolute
/// redirects (signed CDN URLs) are returned as the final `location`
/// without re-issuing the request, so auth headers are never replayed
/// there.
pub async fn head_metadata(
    client: &Client,
    url: &str,
    auth_header: Option<&str>,
    timeout: Duration,
    repo_display: &str,
) -> Result<FileMetadata, HubError> {
    let mut current_url = url.to_string();

    let response = loop {
        let mut builder = client
            .head(&current_url)
            .header("Accept-Encoding", "identity");
        if let Some(token) = auth_header {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let response = tokio::time::timeout(timeout, builder.send())
            .await
            .map_err(|_| HubError::FileMetadataError {
                url: current_url.clone(),
                reason: "timed out waiting for metadata response".to_string(),
            })??;

        if !response.status().is_redirection() {
            break response;
        }

        let Some(location) = response.headers().get("Location").and_then(|v| v.to_str().ok()) else {
            break response;
        };

        // A bare URL (no scheme, no host) is relative; re-issue HEAD at the
        // same origin with the redirect's path and query. A URL with a host
        // is absolute (a signed CDN link) and must not be followed here —
        // the caller strips auth and issues the GET there directly.
        if Url::parse(location).is_ok() {
            break response;
        }
        let Some(next) = Url::parse(&current_url).ok().and_then(|base| base.join(location).ok()) else {
            return Err(HubError::FileMetadataError {
                url: current_url,
                reason: format!("unparseable redirect location: {location}"),
            });
        };
        current_url = next.to_string();
    };

    if response.status().is_redirection() {
        // Absolute (or unparseable-location) redirect: report headers
        // carried alongside it plus the raw Location as `location`.
        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| current_url.clone());
        return Ok(FileMetadata {
            commit: header_required(response.headers(), "X-Repo-Commit", &current_url)?,
            etag: extract_etag(response.headers(), &current_url)?,
            size: extract_size(response.headers(), &current_url)?,
            location,
            xet: extract_xet(response.headers()),
        });
    }

    if response.status() != StatusCode::OK {
        let status = response.status();
        let headers = response.headers().clone();
        return Err(classify_error(status, &headers, None, repo_display, &current_url, None));
    }

    Ok(FileMetadata {
        commit: header_required(response.headers(), "X-Repo-Commit", &current_url)?,
        etag: extract_etag(response.headers(), &current_url)?,
        size: extract_size(response.headers(), &current_url)?,
        location: current_url.clone(),
        xet: extract_xet(response.headers()),
    })
}

/// True when `a` and `b` parse to the same host. A caller uses this to
/// decide whether `meta.location` is still same-origin with the resolve
/// URL it probed — if not, authorization must be stripped before the GET.
/// Unparseable input is treated as different hosts, the safer default.
pub fn same_host(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str() == b.host_str(),
        _ => false,
    }
}

fn header_required(headers: &reqwest::header::HeaderMap, name: &str, url: &str) -> Result<String, HubError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| HubError::FileMetadataError {
            url: url.to_string(),
            reason: format!("missing required header {name}"),
        })
}

fn extract_etag(headers: &reqwest::header::HeaderMap, url: &str) -> Result<Etag, HubError> {
    let raw = headers
        .get("X-Linked-Etag")
        .or_else(|| headers.get("ETag"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| HubError::FileMetadataError {
            url: url.to_string(),
            reason: "missing ETag/X-Linked-Etag header".to_string(),
        })?;
    Ok(Etag::normalize(raw))
}

fn extract_size(headers: &reqwest::header::HeaderMap, url: &str) -> Result<u64, HubError> {
    headers
        .get("X-Linked-Size")
        .or_else(|| headers.get("Content-Length"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| HubError::FileMetadataError {
            url: url.to_string(),
            reason: "missing X-Linked-Size/Content-Length header".to_string(),
        })
}

fn extract_xet(headers: &reqwest::header::HeaderMap) -> Option<XetDescriptor> {
    let file_hash = headers.get("X-Xet-Hash")?.to_str().ok()?.to_string();
    let refresh_route = headers
        .get("X-Xet-Refresh-Route")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Some(XetDescriptor {
        file_hash,
        refresh_route,
    })
}
