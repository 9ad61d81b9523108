//! # Fetch Queue Module
//!
//! Implements the ordered store of queue items that forms the crawling
//! frontier, plus the default in-memory implementation.
//!
//! ## Overview
//!
//! The queue is asynchronous *by contract*: every operation is an awaitable
//! that may complete on a later scheduler turn, so durable backends (disk,
//! database) can be swapped in behind the same trait. The default
//! `MemoryQueue` deliberately yields before completing its mutating
//! operations so callers cannot accidentally rely on synchronous dispatch.
//!
//! ## Key Responsibilities
//!
//! - **Ordered storage**: insertion order equals id order, always
//! - **Duplicate detection**: a scan index of URLs gives O(1) `exists`
//! - **Work selection**: `oldest_unfetched` scans forward from a monotone
//!   cursor so repeated picks never revisit earlier indices
//! - **Aggregate queries**: max/min/avg over a whitelist of numeric
//!   state-data fields, plus comparator-based counting and filtering
//! - **Snapshot / restore**: `freeze` persists the queue as a JSON document,
//!   `defrost` rebuilds the scan index and cursor from one

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, trace};

use crate::error::QueueError;
use crate::item::{ItemFilter, QueueItem, QueueItemUpdate, Status};

/// Numeric `StateData` fields that aggregate queries may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    ActualDataSize,
    ContentLength,
    DownloadTime,
    RequestLatency,
    RequestTime,
}

impl Statistic {
    fn extract(self, item: &QueueItem) -> Option<u64> {
        let data = &item.state_data;
        match self {
            Statistic::ActualDataSize => data.actual_data_size,
            Statistic::ContentLength => data.content_length,
            Statistic::DownloadTime => data.download_time,
            Statistic::RequestLatency => data.request_latency,
            Statistic::RequestTime => data.request_time,
        }
    }
}

impl FromStr for Statistic {
    type Err = QueueError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "actual_data_size" => Ok(Statistic::ActualDataSize),
            "content_length" => Ok(Statistic::ContentLength),
            "download_time" => Ok(Statistic::DownloadTime),
            "request_latency" => Ok(Statistic::RequestLatency),
            "request_time" => Ok(Statistic::RequestTime),
            other => Err(QueueError::UnknownStatistic(other.to_string())),
        }
    }
}

/// Contract for queue implementations.
///
/// Implementations must keep `id == position` for every stored item and must
/// never panic on valid input; the absence of unfetched work is `Ok(None)`,
/// not an error.
#[async_trait]
pub trait FetchQueue: Send + Sync {
    /// Inserts an item, assigning `id` and `Status::Queued`.
    ///
    /// Fails with [`QueueError::Duplicate`] when the URL is present and
    /// `force` is unset, and with [`QueueError::AddedTwice`] when the very
    /// item being forced has already been through `add` once.
    async fn add(&self, item: QueueItem, force: bool) -> Result<QueueItem, QueueError>;

    async fn exists(&self, url: &str) -> Result<bool, QueueError>;

    async fn get(&self, index: usize) -> Result<QueueItem, QueueError>;

    /// Merges a partial update into the item with the given id and returns
    /// the mutated item.
    async fn update(&self, id: usize, updates: QueueItemUpdate)
        -> Result<QueueItem, QueueError>;

    /// Returns the first `Queued` item at or after the cursor, advancing the
    /// cursor to its index.
    async fn oldest_unfetched(&self) -> Result<Option<QueueItem>, QueueError>;

    /// Maximum of a statistic across fetched items; 0 for an empty set.
    async fn max(&self, statistic: Statistic) -> Result<f64, QueueError>;

    /// Minimum of a statistic across fetched items; 0 for an empty set.
    async fn min(&self, statistic: Statistic) -> Result<f64, QueueError>;

    /// Average of a statistic across fetched items; NaN for an empty set.
    async fn avg(&self, statistic: Statistic) -> Result<f64, QueueError>;

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, QueueError>;

    async fn filter_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;

    /// Number of items that have reached a terminal status.
    async fn count_completed(&self) -> Result<usize, QueueError>;

    /// Persists the queue to a JSON document, rewriting in-flight statuses
    /// back to `Queued` so recovery resumes cleanly.
    async fn freeze(&self, path: &Path) -> Result<(), QueueError>;

    /// Restores a queue persisted by `freeze`, rebuilding the scan index and
    /// the oldest-unfetched cursor.
    async fn defrost(&self, path: &Path) -> Result<(), QueueError>;
}

/// On-disk shape written by `freeze`.
#[derive(Debug, Serialize, Deserialize)]
struct QueueSnapshot {
    items: Vec<QueueItem>,
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    items: Vec<QueueItem>,
    /// URLs currently present, for O(1) duplicate detection.
    scan_index: HashSet<String>,
    /// Monotone hint accelerating the next-work search.
    oldest_unfetched: usize,
}

/// The default in-memory queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: RwLock<MemoryQueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FetchQueue for MemoryQueue {
    async fn add(&self, mut item: QueueItem, force: bool) -> Result<QueueItem, QueueError> {
        // Completion may land on a later scheduler turn; callers must not
        // depend on synchronous dispatch.
        tokio::task::yield_now().await;

        let mut inner = self.inner.write();
        if inner.scan_index.contains(&item.url) {
            if !force {
                return Err(QueueError::Duplicate(item.url));
            }
            if item.status != Status::Created {
                // This very item already went through `add` once.
                return Err(QueueError::AddedTwice(item.url));
            }
        }

        item.id = inner.items.len();
        item.status = Status::Queued;
        inner.scan_index.insert(item.url.clone());
        inner.items.push(item.clone());
        trace!(id = item.id, url = %item.url, "queued item");
        Ok(item)
    }

    async fn exists(&self, url: &str) -> Result<bool, QueueError> {
        Ok(self.inner.read().scan_index.contains(url))
    }

    async fn get(&self, index: usize) -> Result<QueueItem, QueueError> {
        let inner = self.inner.read();
        inner
            .items
            .get(index)
            .cloned()
            .ok_or(QueueError::OutOfBounds {
                index,
                len: inner.items.len(),
            })
    }

    async fn update(
        &self,
        id: usize,
        updates: QueueItemUpdate,
    ) -> Result<QueueItem, QueueError> {
        tokio::task::yield_now().await;

        let mut inner = self.inner.write();
        let item = inner
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(QueueError::UnknownItem(id))?;
        updates.apply(item);
        Ok(item.clone())
    }

    async fn oldest_unfetched(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut inner = self.inner.write();
        let start = inner.oldest_unfetched;
        for index in start..inner.items.len() {
            if inner.items[index].status == Status::Queued {
                inner.oldest_unfetched = index;
                return Ok(Some(inner.items[index].clone()));
            }
        }
        Ok(None)
    }

    async fn max(&self, statistic: Statistic) -> Result<f64, QueueError> {
        Ok(fetched_values(&self.inner.read().items, statistic)
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
            .unwrap_or(0.0))
    }

    async fn min(&self, statistic: Statistic) -> Result<f64, QueueError> {
        Ok(fetched_values(&self.inner.read().items, statistic)
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
            .unwrap_or(0.0))
    }

    async fn avg(&self, statistic: Statistic) -> Result<f64, QueueError> {
        let inner = self.inner.read();
        let (sum, count) = fetched_values(&inner.items, statistic)
            .fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
        // An empty set averages to NaN, by documented contract.
        Ok(sum / count as f64)
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, QueueError> {
        Ok(self
            .inner
            .read()
            .items
            .iter()
            .filter(|item| filter.matches(item))
            .count())
    }

    async fn filter_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self
            .inner
            .read()
            .items
            .iter()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.read().items.len())
    }

    async fn count_completed(&self) -> Result<usize, QueueError> {
        Ok(self
            .inner
            .read()
            .items
            .iter()
            .filter(|item| item.fetched)
            .count())
    }

    async fn freeze(&self, path: &Path) -> Result<(), QueueError> {
        let mut items = self.inner.read().items.clone();
        // In-flight work must not be persisted as spooled/headers.
        for item in items.iter_mut() {
            if !item.fetched && item.status != Status::Queued {
                item.status = Status::Queued;
            }
        }

        let encoded = serde_json::to_vec_pretty(&QueueSnapshot { items })?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, encoded)?;
        std::fs::rename(&tmp_path, path)?;
        info!(?path, "queue frozen");
        Ok(())
    }

    async fn defrost(&self, path: &Path) -> Result<(), QueueError> {
        let bytes = std::fs::read(path)?;
        let snapshot: QueueSnapshot = serde_json::from_slice(&bytes)?;

        let scan_index = snapshot
            .items
            .iter()
            .map(|item| item.url.clone())
            .collect::<HashSet<_>>();
        let oldest_unfetched = snapshot
            .items
            .iter()
            .position(|item| item.status == Status::Queued)
            .unwrap_or(0);

        let mut inner = self.inner.write();
        debug!(
            items = snapshot.items.len(),
            cursor = oldest_unfetched,
            "queue defrosted"
        );
        *inner = MemoryQueueInner {
            items: snapshot.items,
            scan_index,
            oldest_unfetched,
        };
        Ok(())
    }
}

fn fetched_values<'a>(
    items: &'a [QueueItem],
    statistic: Statistic,
) -> impl Iterator<Item = f64> + 'a {
    items
        .iter()
        .filter(|item| item.fetched)
        .filter_map(move |item| statistic.extract(item))
        .map(|v| v as f64)
        .filter(|v| v.is_finite())
}
