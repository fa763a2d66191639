//! Error types shared by the reindex pipeline

use crate::source::TransportError;

/// A single source item that could not be turned into a document.
///
/// Contained at item granularity: the page keeps going without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// The source returned `null` (or nothing) in place of an item
    Missing,
    /// The item is not a JSON object
    NotAnObject,
    /// A required field (usually the source identifier) is absent
    MissingField(&'static str),
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("empty item"),
            Self::NotAnObject => f.write_str("item is not an object"),
            Self::MissingField(name) => write!(f, "item has no `{name}`"),
        }
    }
}

impl std::error::Error for ItemError {}

/// Failure reported by an [`IndexWriter`](crate::index::IndexWriter).
#[derive(Debug)]
pub enum IndexError {
    Http {
        status: Option<u16>,
        message: String,
    },
    /// The index accepted the request but refused the operation
    Rejected(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "index HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "index HTTP error: {message}"),
            Self::Rejected(msg) => write!(f, "index rejected request: {msg}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl IndexError {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: crate::source::strip_url(&e.to_string()),
        }
    }
}

/// Failure reported by a [`JobQueue`](crate::queue::JobQueue) backend.
#[derive(Debug)]
pub enum QueueError {
    Backend(String),
    /// A job payload could not be encoded or decoded
    Codec(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "queue backend: {msg}"),
            Self::Codec(msg) => write!(f, "queue payload: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Run-level failure of a reindex.
///
/// Item failures never reach this type; page failures do (as
/// [`FetchExhausted`](ReindexError::FetchExhausted)) and abort a single-process
/// run, or fail one job in queue mode.
#[derive(Debug)]
pub enum ReindexError {
    /// Retry budget spent on one page (or on the total-count request)
    FetchExhausted {
        label: String,
        attempts: u32,
        last: TransportError,
    },
    /// Refused before any side effect, e.g. cleanup without a transaction key
    Configuration(String),
    Index(IndexError),
    Queue(QueueError),
}

impl std::fmt::Display for ReindexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchExhausted {
                label,
                attempts,
                last,
            } => write!(f, "{label}: fetch failed after {attempts} attempts: {last}"),
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::Index(e) => write!(f, "{e}"),
            Self::Queue(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReindexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FetchExhausted { last, .. } => Some(last),
            Self::Configuration(_) => None,
            Self::Index(e) => Some(e),
            Self::Queue(e) => Some(e),
        }
    }
}

impl From<IndexError> for ReindexError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

impl From<QueueError> for ReindexError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}
