//! Byte Transport (C7): streams a GET with Range resume, chunked write,
//! a consistency check against the expected size, and auto-retry on
//! transient faults encountered mid-body.

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWriteExt;

use crate::error::HubError;
use crate::http::classify::classify_error;
use crate::http::session::HttpSession;

const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Files larger than this have no basic-transport path; only an
/// accelerated transport (none ships in this crate) can move them.
const MAX_BASIC_TRANSPORT_BYTES: u64 = 50 * 1024 * 1024 * 1024;

/// Streams `url` into `sink`, appending starting at `resume_size`, until
/// the final length equals `expected_size`. Retries transient mid-body
/// faults with a budget that resets on every byte received. `repo_display`
/// feeds failure classification the same repo string C6/C5 use elsewhere.
pub async fn http_get(
    session: &HttpSession,
    url: &str,
    sink: &mut (impl tokio::io::AsyncWrite + Unpin),
    mut headers: HeaderMap,
    mut resume_size: u64,
    expected_size: u64,
    repo_display: &str,
) -> Result<(), HubError> {
    if expected_size > MAX_BASIC_TRANSPORT_BYTES {
        return Err(HubError::TransportTooLarge {
            size: expected_size,
            limit: MAX_BASIC_TRANSPORT_BYTES,
        });
    }

    let caller_range = headers
        .remove(reqwest::header::RANGE)
        .and_then(|v| v.to_str().ok().map(str::to_string));

    let mut budget = DEFAULT_RETRY_BUDGET;

    loop {
        let client = session.client();
        let mut request_headers = headers.clone();
        let range_value = adjusted_range(caller_range.as_deref(), resume_size)?;
        if let Some(range) = &range_value {
            request_headers.insert(
                reqwest::header::RANGE,
                range.parse().expect("valid range header"),
            );
        }

        let response = client
            .get(url)
            .headers(request_headers)
            .send()
            .await
            .map_err(HubError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let resp_headers = response.headers().clone();
            let body: Option<serde_json::Value> = response.json().await.ok();
            return Err(classify_error(
                status,
                &resp_headers,
                body.as_ref(),
                repo_display,
                url,
                range_value.as_deref(),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut written = resume_size;

        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    sink.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                    budget = DEFAULT_RETRY_BUDGET;
                }
                Some(Err(err)) => {
                    if budget == 0 {
                        return Err(HubError::Request(err));
                    }
                    budget -= 1;
                    tracing::warn!(url, written, budget, "transient fault mid-download, resuming");
                    if is_tls_class_fault(&err) {
                        session.reset();
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    resume_size = written;
                    break;
                }
                None => {
                    sink.flush().await?;
                    if written != expected_size {
                        return Err(HubError::ConsistencyError {
                            url: url.to_string(),
                            expected: expected_size,
                            actual: written,
                        });
                    }
                    return Ok(());
                }
            }
        }
    }
}

fn is_tls_class_fault(err: &reqwest::Error) -> bool {
    err.is_connect() || err.to_string().to_ascii_lowercase().contains("tls")
}

/// Translates a caller-supplied `Range` header by `resume_size`, so a
/// caller's byte request still lands correctly after this function has
/// already appended `resume_size` bytes to `sink`. Preserves suffix
/// (`bytes=-N`) and open-ended (`bytes=A-`) forms; rejects multi-range
/// requests and ranges fully covered by bytes already resumed.
fn adjusted_range(caller_range: Option<&str>, resume_size: u64) -> Result<Option<String>, HubError> {
    let Some(range) = caller_range else {
        return Ok((resume_size > 0).then(|| format!("bytes={resume_size}-")));
    };

    let rest = range
        .strip_prefix("bytes=")
        .ok_or_else(|| HubError::InvalidRange(format!("unsupported range unit: {range}")))?;
    if rest.contains(',') {
        return Err(HubError::InvalidRange(format!("multi-range requests are not supported: {range}")));
    }

    if let Some(suffix) = rest.strip_prefix('-') {
        let n: u64 = suffix
            .parse()
            .map_err(|_| HubError::InvalidRange(format!("invalid suffix range: {range}")))?;
        if n <= resume_size {
            return Err(HubError::InvalidRange(format!(
                "suffix range {range} is fully covered by {resume_size} resumed bytes"
            )));
        }
        return Ok(Some(format!("bytes=-{}", n - resume_size)));
    }

    let (start, end) = rest
        .split_once('-')
        .ok_or_else(|| HubError::InvalidRange(format!("invalid range: {range}")))?;
    let start: u64 = start
        .parse()
        .map_err(|_| HubError::InvalidRange(format!("invalid range start: {range}")))?;
    let adjusted_start = start + resume_size;
    if end.is_empty() {
        return Ok(Some(format!("bytes={adjusted_start}-")));
    }
    let end: u64 = end
        .parse()
        .map_err(|_| HubError::InvalidRange(format!("invalid range end: {range}")))?;
    if adjusted_start > end {
        return Err(HubError::InvalidRange(format!(
            "range {range} is fully covered by {resume_size} resumed bytes"
        )));
    }
    Ok(Some(format!("bytes={adjusted_start}-{end}")))
}

/// Prefers `Content-Range`'s total (the part after the final `/`) over
/// `Content-Length` when computing the expected file length.
pub fn expected_length_from_headers(headers: &HeaderMap) -> Option<u64> {
    if let Some(range) = headers.get("Content-Range").and_then(|v| v.to_str().ok())
        && let Some(total) = range.rsplit('/').next()
        && let Ok(n) = total.parse::<u64>()
    {
        return Some(n);
    }
    headers
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}
