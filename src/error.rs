//! Error types shared across the crate.
//!
//! `CrawlError` is the top-level error returned from builder validation and
//! engine operations; `QueueError` carries the distinct failure kinds of the
//! queue contract so callers can branch on them (duplicate vs. forced
//! re-insertion vs. bad index, and so on).

use thiserror::Error;

/// Errors surfaced by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The URL is already present and `force` was not set.
    #[error("URL already queued: {0}")]
    Duplicate(String),

    /// The same item object was forced into the queue a second time.
    #[error("item cannot be added to the queue twice: {0}")]
    AddedTwice(String),

    /// `get` was called with an index past the end of the queue.
    #[error("queue index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },

    /// `update` targeted an id no item carries.
    #[error("no queue item with id {0}")]
    UnknownItem(usize),

    /// An aggregate query named a statistic outside the whitelist.
    #[error("invalid statistic: {0}")]
    UnknownStatistic(String),

    #[error("queue persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl QueueError {
    /// True for the plain-duplicate kind (not the forced re-insertion error).
    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::Duplicate(_))
    }
}

/// Top-level error type for the crawler engine.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Caller-side misconfiguration, reported at the call site.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A fetch or download condition failed while evaluating.
    #[error("condition error: {0}")]
    Condition(String),

    /// A cookie could not be constructed or parsed.
    #[error("cookie error: {0}")]
    Cookie(String),

    /// No live condition slot matched the requested id.
    #[error("no condition registered under id {0}")]
    UnknownCondition(usize),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// robots.txt fetch was redirected outside the admitted domains.
    #[error("robots.txt redirected to a disallowed domain: {0}")]
    RobotsRedirect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
