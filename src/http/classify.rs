//! Error Classifier (C5): maps a failed HTTP response to the domain error
//! taxonomy using status code and header hints. Pure and unit-testable
//! without any network access.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::HubError;

/// Classifies a failed response. `repo` is the repository display string
/// (`kind/owner/name`) for error messages; `url` is the request URL, used
/// to distinguish the repo-API/resolve shape from other failing calls.
/// `requested_range` is the `Range` header value the caller sent, if any —
/// only relevant to the 416 branch, which echoes it back alongside the
/// server's returned range.
pub fn classify_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: Option<&serde_json::Value>,
    repo: &str,
    url: &str,
    requested_range: Option<&str>,
) -> HubError {
    let request_id = header_str(headers, "x-request-id")
        .or_else(|| header_str(headers, "X-Amzn-Trace-Id"))
        .map(str::to_string);
    let error_code = header_str(headers, "X-Error-Code");
    let error_message = header_str(headers, "X-Error-Message");
    let commit_hint = header_str(headers, "X-Repo-Commit").unwrap_or("unknown").to_string();

    if error_code == Some("RevisionNotFound") {
        return HubError::RevisionNotFound {
            repo: repo.to_string(),
            revision: commit_hint,
        };
    }
    if error_code == Some("EntryNotFound") {
        return HubError::EntryNotFound {
            repo: repo.to_string(),
            revision: commit_hint,
            path: "unknown".to_string(),
        };
    }
    if error_code == Some("GatedRepo") {
        return HubError::GatedRepo {
            repo: repo.to_string(),
            request_id,
        };
    }
    if error_message == Some("Access to this resource is disabled.") {
        return HubError::DisabledRepo {
            repo: repo.to_string(),
            request_id,
        };
    }

    let looks_like_repo_api_shape = looks_like_repo_api_or_resolve_url(url);
    let is_ambiguous_401 = status == StatusCode::UNAUTHORIZED
        && error_message != Some("Invalid credentials in Authorization header.");
    if error_code == Some("RepoNotFound") || (is_ambiguous_401 && looks_like_repo_api_shape) {
        return HubError::RepositoryNotFound {
            repo: repo.to_string(),
            request_id,
        };
    }

    if status == StatusCode::BAD_REQUEST {
        return HubError::BadRequest {
            message: assembled_message(status, error_message, body, &request_id),
        };
    }

    if status == StatusCode::FORBIDDEN {
        let base = assembled_message(status, error_message, body, &request_id);
        return HubError::HubHttpError {
            message: format!(
                "{base}; the token may lack permission to access this repository, or its license/terms may not have been accepted"
            ),
            server_messages: server_messages(error_message, body),
            request_id,
            status: Some(status.as_u16()),
        };
    }

    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        let requested = requested_range.unwrap_or("unknown");
        let returned = header_str(headers, "Content-Range").unwrap_or("unknown");
        let base = assembled_message(status, error_message, body, &request_id);
        return HubError::HubHttpError {
            message: format!("{base}; requested range {requested}, server returned range {returned}"),
            server_messages: server_messages(error_message, body),
            request_id,
            status: Some(status.as_u16()),
        };
    }

    let message = assembled_message(status, error_message, body, &request_id);
    let server_messages = server_messages(error_message, body);
    HubError::HubHttpError {
        message,
        server_messages,
        request_id,
        status: Some(status.as_u16()),
    }
}

fn looks_like_repo_api_or_resolve_url(url: &str) -> bool {
    if let Some(rest) = url.strip_prefix("https://") {
        let Some(slash) = rest.find('/') else {
            return false;
        };
        let path = &rest[slash..];
        return path.starts_with("/api/models/")
            || path.starts_with("/api/datasets/")
            || path.starts_with("/api/spaces/")
            || path.contains("/resolve/");
    }
    false
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Server-side messages from `X-Error-Message` and JSON body fields
/// `error`/`errors[*].message`, deduplicated preserving first occurrence.
fn server_messages(error_message: Option<&str>, body: Option<&serde_json::Value>) -> Vec<String> {
    let mut messages = Vec::new();
    let mut push_unique = |m: String| {
        if !messages.contains(&m) {
            messages.push(m);
        }
    };

    if let Some(m) = error_message {
        push_unique(m.to_string());
    }
    if let Some(body) = body {
        if let Some(e) = body.get("error").and_then(|v| v.as_str()) {
            push_unique(e.to_string());
        }
        if let Some(errors) = body.get("errors").and_then(|v| v.as_array()) {
            for err in errors {
                if let Some(m) = err.get("message").and_then(|v| v.as_str()) {
                    push_unique(m.to_string());
                }
            }
        }
    }
    messages
}

fn assembled_message(
    status: StatusCode,
    error_message: Option<&str>,
    body: Option<&serde_json::Value>,
    request_id: &Option<String>,
) -> String {
    let messages = server_messages(error_message, body);
    let mut line = if messages.is_empty() {
        format!("{status}")
    } else {
        format!("{status}: {}", messages.join("; "))
    };
    if let Some(id) = request_id
        && !line.contains(id.as_str())
    {
        line.push_str(&format!(" (request id: {id})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn gated_repo_from_error_code() {
        let h = headers(&[("X-Error-Code", "GatedRepo")]);
        let err = classify_error(
            StatusCode::FORBIDDEN,
            &h,
            None,
            "models/org/x",
            "https://h/api/models/org/x",
            None,
        );
        assert!(matches!(err, HubError::GatedRepo { .. }));
    }

    #[test]
    fn ambiguous_401_on_repo_api_shape_is_repository_not_found() {
        let h = headers(&[("X-Error-Message", "some other message")]);
        let err = classify_error(
            StatusCode::UNAUTHORIZED,
            &h,
            None,
            "models/org/x",
            "https://huggingface.co/api/models/org/x",
            None,
        );
        assert!(matches!(err, HubError::RepositoryNotFound { .. }));
    }

    #[test]
    fn real_auth_failure_401_is_not_reclassified() {
        let h = headers(&[("X-Error-Message", "Invalid credentials in Authorization header.")]);
        let err = classify_error(
            StatusCode::UNAUTHORIZED,
            &h,
            None,
            "models/org/x",
            "https://huggingface.co/api/models/org/x",
            None,
        );
        assert!(matches!(err, HubError::HubHttpError { .. }));
    }

    #[test]
    fn disabled_repo_from_message() {
        let h = headers(&[("X-Error-Message", "Access to this resource is disabled.")]);
        let err = classify_error(StatusCode::FORBIDDEN, &h, None, "models/org/x", "https://h/whatever", None);
        assert!(matches!(err, HubError::DisabledRepo { .. }));
    }

    #[test]
    fn bad_request_status() {
        let h = HeaderMap::new();
        let err = classify_error(StatusCode::BAD_REQUEST, &h, None, "models/org/x", "https://h/whatever", None);
        assert!(matches!(err, HubError::BadRequest { .. }));
    }

    #[test]
    fn forbidden_status_carries_permission_guidance() {
        let h = HeaderMap::new();
        let err = classify_error(StatusCode::FORBIDDEN, &h, None, "models/org/x", "https://h/whatever", None);
        match err {
            HubError::HubHttpError { message, .. } => assert!(message.contains("permission")),
            other => panic!("expected HubHttpError, got {other:?}"),
        }
    }

    #[test]
    fn range_not_satisfiable_includes_requested_and_returned_ranges() {
        let h = headers(&[("Content-Range", "bytes */500")]);
        let err = classify_error(
            StatusCode::RANGE_NOT_SATISFIABLE,
            &h,
            None,
            "models/org/x",
            "https://h/whatever",
            Some("bytes=600-700"),
        );
        match err {
            HubError::HubHttpError { message, .. } => {
                assert!(message.contains("bytes=600-700"));
                assert!(message.contains("bytes */500"));
            }
            other => panic!("expected HubHttpError, got {other:?}"),
        }
    }

    #[test]
    fn entry_not_found_carries_commit_hint_from_header() {
        let h = headers(&[("X-Error-Code", "EntryNotFound"), ("X-Repo-Commit", "deadbeef")]);
        let err = classify_error(StatusCode::NOT_FOUND, &h, None, "models/org/x", "https://h/whatever", None);
        match err {
            HubError::EntryNotFound { revision, .. } => assert_eq!(revision, "deadbeef"),
            other => panic!("expected EntryNotFound, got {other:?}"),
        }
    }

    #[test]
    fn server_messages_dedup_preserves_first_occurrence() {
        let body = serde_json::json!({"error": "dup", "errors": [{"message": "dup"}, {"message": "unique"}]});
        let msgs = server_messages(Some("dup"), Some(&body));
        assert_eq!(msgs, vec!["dup".to_string(), "unique".to_string()]);
    }

    #[test]
    fn request_id_inlined_when_absent_from_message() {
        let h = headers(&[("x-request-id", "req-42")]);
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, &h, None, "models/org/x", "https://h/x", None);
        assert_eq!(err.request_id(), Some("req-42"));
        assert!(err.client_message().contains("req-42"));
    }
}
