//! HTTP Session (C3): one logical session per process, carrying a cookie
//! jar and connection pool. Rebuildable on TLS-class faults so stale TLS
//! state can't poison subsequent retries.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::Client;

/// Shared, rebuildable `reqwest::Client` handle. `reset()` discards the
/// pooled connections and cookie jar; existing `Client` clones held by
/// in-flight requests are unaffected (each request clones the handle up
/// front), matching the "only subsequent requests are affected" contract.
pub struct HttpSession {
    client: RwLock<Client>,
}

impl HttpSession {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(build_client()),
        }
    }

    pub fn client(&self) -> Client {
        self.client.read().expect("session lock poisoned").clone()
    }

    /// Rebuilds the underlying client. Invoked when a TLS/connection-layer
    /// fault is observed so subsequent retries start from a clean session.
    pub fn reset(&self) {
        tracing::warn!("resetting HTTP session after a TLS/connection-layer fault");
        let mut guard = self.client.write().expect("session lock poisoned");
        *guard = build_client();
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .cookie_store(true)
        // Redirects are followed manually by the metadata probe (C6), which
        // must distinguish relative (same-origin) from absolute (signed CDN)
        // locations before deciding whether to replay auth headers.
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build HTTP client")
}
