//! Upstream content API seam and shared HTTP plumbing.
//!
//! The orchestrator only ever sees [`SourceClient`]; concrete clients live in
//! the per-source crates and reuse [`http_client`] for connection pooling.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Network or HTTP failure talking to the upstream API.
///
/// Every variant is retried by [`fetch_with_retry`](crate::retry::fetch_with_retry);
/// there is no non-retryable class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Body arrived but was not the expected JSON
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Create HTTP error from reqwest error.
    ///
    /// The URL is stripped so query strings do not end up in logs.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(strip_url(&e.to_string()));
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: strip_url(&e.to_string()),
        }
    }
}

/// reqwest appends ` for url (...)` to its messages
pub(crate) fn strip_url(text: &str) -> String {
    match text.find(" for url (") {
        Some(pos) => text[..pos].to_string(),
        None => text.to_string(),
    }
}

/// One raw page of upstream data.
///
/// Shape is source specific; [`EntityAdapter::prepare_items`](crate::adapter::EntityAdapter::prepare_items)
/// knows how to pull items and totals out of it.
pub type RawPage = Value;

/// Fetches raw pages from the upstream content API.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// GET `resource` with the adapter-built filter `query`.
    async fn get(&self, resource: &str, query: &str) -> Result<RawPage, TransportError>;
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Join a base URL, a resource path and an optional query string.
pub fn resource_url(base: &str, resource: &str, query: &str) -> String {
    let base = base.trim_end_matches('/');
    let resource = resource.trim_start_matches('/');
    if query.is_empty() {
        format!("{base}/{resource}")
    } else {
        format!("{base}/{resource}?{query}")
    }
}
