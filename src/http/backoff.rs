//! Backoff Wrapper (C4): retries a request-issuing closure with exponential
//! backoff on a configurable set of retryable statuses and transport-level
//! faults, resetting the HTTP session on TLS-class faults.

use std::time::Duration;

use reqwest::StatusCode;

use crate::http::session::HttpSession;

const DEFAULT_MAX_RETRIES: u32 = 5;
const BASE_WAIT: Duration = Duration::from_secs(1);
const MAX_WAIT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub retry_statuses: Vec<StatusCode>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_statuses: vec![StatusCode::SERVICE_UNAVAILABLE],
        }
    }
}

impl BackoffPolicy {
    /// The policy used for metadata GET/paginated listing calls, which
    /// additionally retry on 429.
    pub fn with_rate_limit_retry() -> Self {
        let mut policy = Self::default();
        policy.retry_statuses.push(StatusCode::TOO_MANY_REQUESTS);
        policy
    }
}

/// Issues `request` (an async closure producing a fresh attempt each call)
/// up to `policy.max_retries` times, sleeping with exponential backoff
/// between attempts. A produced response whose status is outside the
/// retry set is returned immediately regardless of success/failure — the
/// caller decides whether to treat it as an error (mirrors
/// `raise_for_status` being the caller's responsibility).
pub async fn backoff<F, Fut>(
    session: &HttpSession,
    policy: &BackoffPolicy,
    mut request: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut wait = BASE_WAIT;
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        match request().await {
            Ok(response) => {
                if !policy.retry_statuses.contains(&response.status()) {
                    return Ok(response);
                }
                if attempt == policy.max_retries {
                    return Ok(response);
                }
                tracing::debug!(
                    status = %response.status(),
                    attempt,
                    "retrying after retryable status"
                );
            }
            Err(err) => {
                if is_tls_class_fault(&err) {
                    session.reset();
                }
                if attempt == policy.max_retries {
                    return Err(err);
                }
                tracing::debug!(attempt, error = %err, "retrying after transport fault");
                last_err = Some(err);
            }
        }
        tokio::time::sleep(wait).await;
        wait = MAX_WAIT.min(wait * 2);
    }

    // Unreachable in practice: the loop always returns within the last
    // iteration, but `last_err` covers the type checker.
    Err(last_err.expect("backoff loop exited without a result"))
}

fn is_tls_class_fault(err: &reqwest::Error) -> bool {
    err.is_connect() || err.to_string().to_ascii_lowercase().contains("tls")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_immediately_on_non_retryable_status() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let client = session.client();
        let url = server.uri();

        let response = backoff(&session, &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            client.get(&url).send()
        })
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_retryable_status_then_succeeds() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let session = HttpSession::new();
        let mut policy = BackoffPolicy::default();
        policy.max_retries = 5;
        let client = session.client();
        let url = server.uri();

        let response = backoff(&session, &policy, || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
