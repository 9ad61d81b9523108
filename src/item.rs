//! # Queue Item Module
//!
//! Defines the unit of work flowing through the crawler: the `QueueItem`,
//! its lifecycle `Status` state machine, and the `StateData` bag populated
//! across the request lifecycle.
//!
//! ## Lifecycle
//!
//! `Created` exists only transiently between URL processing and queue
//! insertion. The happy path is `Queued → Spooled → Headers → Downloaded`;
//! every other status is terminal and is always set together with
//! `fetched = true`. Once an item is terminal no further state mutation
//! occurs except through freeze/defrost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Produced by the URL processor, not yet inserted.
    Created,
    /// Waiting in the queue for the control loop to pick it up.
    Queued,
    /// Request issued, headers not yet received.
    Spooled,
    /// Headers received, body streaming.
    Headers,
    /// Body fully received.
    Downloaded,
    /// 3xx with a Location header.
    Redirected,
    /// 404 or 410.
    NotFound,
    /// Other 4xx/5xx or a socket error.
    Failed,
    /// No headers arrived within the configured timeout.
    Timeout,
    /// Rejected by robots.txt rules.
    Disallowed,
    /// Rejected by a download condition after headers.
    DownloadPrevented,
}

impl Status {
    /// True for statuses that end an item's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Downloaded
                | Status::Redirected
                | Status::NotFound
                | Status::Failed
                | Status::Timeout
                | Status::Disallowed
                | Status::DownloadPrevented
        )
    }
}

/// Request-lifecycle measurements and response metadata for one item.
///
/// All fields start unset and are filled in as the request progresses.
/// Durations are milliseconds, sizes are bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_latency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_data_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_incorrect_size: Option<bool>,
}

/// The unit of work held by the fetch queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Assigned at insertion; equals the item's position in the queue.
    pub id: usize,
    /// Canonical URL string.
    pub url: String,
    /// URL scheme without the trailing colon.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Path including the query string.
    pub path: String,
    /// Path without the query string.
    pub uri_path: String,
    /// Seed = 1, discovered = parent depth + 1.
    pub depth: usize,
    /// URL of the item that discovered this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub fetched: bool,
    pub status: Status,
    #[serde(default)]
    pub state_data: StateData,
}

impl QueueItem {
    /// The (scheme, host, port) origin used to key robots.txt rules.
    ///
    /// The port suffix is omitted exactly when the port equals the default
    /// for the scheme.
    pub fn origin(&self) -> String {
        origin_of(&self.protocol, &self.host, self.port)
    }
}

/// Formats `scheme://host[:port]`, dropping the scheme-default port.
pub(crate) fn origin_of(protocol: &str, host: &str, port: u16) -> String {
    if is_default_port(protocol, port) {
        format!("{}://{}", protocol, host)
    } else {
        format!("{}://{}:{}", protocol, host, port)
    }
}

pub(crate) fn is_default_port(protocol: &str, port: u16) -> bool {
    matches!((protocol, port), ("http", 80) | ("https", 443))
}

/// Field-wise partial update applied by `FetchQueue::update`.
///
/// Unset fields leave the item untouched; `state_data` merges per field
/// rather than replacing the whole bag.
#[derive(Debug, Clone, Default)]
pub struct QueueItemUpdate {
    pub fetched: Option<bool>,
    pub status: Option<Status>,
    pub depth: Option<usize>,
    pub state_data: Option<StateDataUpdate>,
}

/// Per-field merge into `StateData`.
#[derive(Debug, Clone, Default)]
pub struct StateDataUpdate {
    pub request_latency: Option<u64>,
    pub request_time: Option<u64>,
    pub download_time: Option<u64>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub code: Option<u16>,
    pub headers: Option<HashMap<String, String>>,
    pub actual_data_size: Option<u64>,
    pub sent_incorrect_size: Option<bool>,
}

impl StateDataUpdate {
    pub(crate) fn apply(self, data: &mut StateData) {
        if self.request_latency.is_some() {
            data.request_latency = self.request_latency;
        }
        if self.request_time.is_some() {
            data.request_time = self.request_time;
        }
        if self.download_time.is_some() {
            data.download_time = self.download_time;
        }
        if self.content_length.is_some() {
            data.content_length = self.content_length;
        }
        if self.content_type.is_some() {
            data.content_type = self.content_type;
        }
        if self.code.is_some() {
            data.code = self.code;
        }
        if self.headers.is_some() {
            data.headers = self.headers;
        }
        if self.actual_data_size.is_some() {
            data.actual_data_size = self.actual_data_size;
        }
        if self.sent_incorrect_size.is_some() {
            data.sent_incorrect_size = self.sent_incorrect_size;
        }
    }
}

impl QueueItemUpdate {
    /// Shorthand for the common terminal transition.
    pub fn terminal(status: Status) -> Self {
        QueueItemUpdate {
            fetched: Some(true),
            status: Some(status),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, item: &mut QueueItem) {
        if let Some(fetched) = self.fetched {
            item.fetched = fetched;
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(depth) = self.depth {
            item.depth = depth;
        }
        if let Some(update) = self.state_data {
            update.apply(&mut item.state_data);
        }
    }
}

/// A comparator for `count_items` / `filter_items`: an item matches when
/// every set field equals the corresponding field on the item.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub url: Option<String>,
    pub host: Option<String>,
    pub depth: Option<usize>,
    pub fetched: Option<bool>,
    pub status: Option<Status>,
    pub state_data: Option<StateDataFilter>,
}

/// Nested comparator over `StateData`.
#[derive(Debug, Clone, Default)]
pub struct StateDataFilter {
    pub content_type: Option<String>,
    pub code: Option<u16>,
    pub sent_incorrect_size: Option<bool>,
}

impl ItemFilter {
    /// Matches items that have reached a terminal status.
    pub fn completed() -> Self {
        ItemFilter {
            fetched: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        if let Some(ref url) = self.url {
            if *url != item.url {
                return false;
            }
        }
        if let Some(ref host) = self.host {
            if *host != item.host {
                return false;
            }
        }
        if let Some(depth) = self.depth {
            if depth != item.depth {
                return false;
            }
        }
        if let Some(fetched) = self.fetched {
            if fetched != item.fetched {
                return false;
            }
        }
        if let Some(status) = self.status {
            if status != item.status {
                return false;
            }
        }
        if let Some(ref inner) = self.state_data {
            if !inner.matches(&item.state_data) {
                return false;
            }
        }
        true
    }
}

impl StateDataFilter {
    fn matches(&self, data: &StateData) -> bool {
        if let Some(ref content_type) = self.content_type {
            if data.content_type.as_deref() != Some(content_type.as_str()) {
                return false;
            }
        }
        if let Some(code) = self.code {
            if data.code != Some(code) {
                return false;
            }
        }
        if let Some(flag) = self.sent_incorrect_size {
            if data.sent_incorrect_size != Some(flag) {
                return false;
            }
        }
        true
    }
}
