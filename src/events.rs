//! # Event Surface Module
//!
//! Every observable lifecycle transition of the crawler is published as a
//! [`CrawlEvent`] on a broadcast channel. Callers subscribe rather than poll:
//! admission and fetch outcomes are events, never return values, so existing
//! consumers can layer indexers, mirrors, or link checkers on top without the
//! engine knowing about them.
//!
//! Events for a given item fire in lifecycle order: `QueueAdd` before
//! `FetchStart`, `FetchStart` before `FetchHeaders`, and exactly one terminal
//! event afterwards. The terminal status is written to the queue *before* the
//! corresponding event is emitted, so listeners always observe consistent
//! state. `DiscoveryComplete` fires strictly after the `FetchComplete` of the
//! item whose body was parsed, and `Complete` fires at most once per start.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::cookies::Cookie;
use crate::item::QueueItem;

/// Response metadata snapshot passed along with fetch events.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub code: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    /// Lowercased header names mapped to their values.
    pub headers: HashMap<String, String>,
}

/// Cached response data handed back on a 304.
#[derive(Debug, Clone, Default)]
pub struct CacheObject {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Option<Bytes>,
}

/// The crawler's observable lifecycle transitions.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// The control loop started (fires on every `start`).
    CrawlStart,
    /// An item passed admission and was queued.
    QueueAdd {
        item: QueueItem,
        referrer: Option<String>,
    },
    /// Admission found the URL already queued.
    QueueDuplicate { url: String },
    /// The queue rejected an add for a reason other than duplication.
    QueueError { url: String, error: String },
    /// The host failed the domain-validity rules.
    InvalidDomain { url: String },
    /// robots.txt rules rejected the URL.
    FetchDisallowed { item: QueueItem },
    /// A fetch condition returned an error.
    FetchConditionError { url: String, error: String },
    /// A fetch condition returned false.
    FetchPrevented { url: String },
    /// The request was issued.
    FetchStart { item: QueueItem },
    /// Response headers arrived.
    FetchHeaders {
        item: QueueItem,
        response: ResponseHead,
    },
    /// The body finished downloading.
    FetchComplete {
        item: QueueItem,
        body: Bytes,
        response: ResponseHead,
    },
    /// A 3xx response carried a Location header.
    FetchRedirect {
        item: QueueItem,
        /// The processed redirect target, when it parsed.
        target: Option<QueueItem>,
        response: ResponseHead,
    },
    /// A 304 terminal; the cache collaborator may supply the stored object.
    NotModified {
        item: QueueItem,
        response: ResponseHead,
        cache_object: Option<CacheObject>,
    },
    Fetch404 {
        item: QueueItem,
        response: ResponseHead,
    },
    Fetch410 {
        item: QueueItem,
        response: ResponseHead,
    },
    /// Another 4xx/5xx terminal.
    FetchError {
        item: QueueItem,
        response: ResponseHead,
    },
    /// The declared or actual size exceeded `max_resource_size`.
    FetchDataError {
        item: QueueItem,
        response: ResponseHead,
    },
    /// No headers within the configured timeout.
    FetchTimeout { item: QueueItem, timeout_ms: u64 },
    /// Socket-level failure (terminal code 600).
    FetchClientError { item: QueueItem, error: String },
    /// Decompression failed; the raw buffer was delivered instead.
    GzipError { item: QueueItem, error: String },
    /// A Set-Cookie header failed to parse; the fetch continues.
    CookieError {
        item: QueueItem,
        error: String,
        header: String,
    },
    /// A download condition returned an error.
    DownloadConditionError { item: QueueItem, error: String },
    /// A download condition returned false after headers.
    DownloadPrevented {
        item: QueueItem,
        response: ResponseHead,
    },
    /// Fetching or parsing robots.txt failed.
    RobotsTxtError { error: String },
    /// Link extraction finished for a downloaded body.
    DiscoveryComplete { item: QueueItem, urls: Vec<String> },
    /// A cookie entered the jar.
    AddCookie { cookie: Cookie },
    /// A cookie left the jar.
    RemoveCookie { cookie: Cookie },
    /// The queue holds no unfetched work and nothing is in flight.
    Complete,
}

/// Multi-subscriber event channel.
///
/// Emission never blocks and never fails: events published while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CrawlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: CrawlEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(1024)
    }
}
