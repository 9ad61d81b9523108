//! # Admission Predicates Module
//!
//! User-supplied predicates gating admission: *fetch conditions* run during
//! URL admission before queueing, *download conditions* run after response
//! headers and before body streaming. Both live in slot vectors with stable
//! ids: `add` returns the slot index, `remove` nullifies the slot without
//! renumbering later ones, and evaluation skips empty slots.
//!
//! A predicate is either synchronous or asynchronous; all predicates in a
//! set must pass, and evaluation short-circuits on the first false result or
//! error.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::CrawlError;
use crate::item::QueueItem;

type SyncPredicate =
    dyn Fn(&QueueItem, Option<&QueueItem>) -> Result<bool, CrawlError> + Send + Sync;
type AsyncPredicate = dyn Fn(QueueItem, Option<QueueItem>) -> BoxFuture<'static, Result<bool, CrawlError>>
    + Send
    + Sync;

/// One admission predicate.
pub enum Condition {
    Sync(Box<SyncPredicate>),
    Async(Box<AsyncPredicate>),
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Sync(_) => f.write_str("Condition::Sync"),
            Condition::Async(_) => f.write_str("Condition::Async"),
        }
    }
}

/// A slot vector of predicates with stable ids.
#[derive(Debug, Default)]
pub struct ConditionSet {
    slots: RwLock<Vec<Option<Arc<Condition>>>>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a predicate and returns its stable slot id.
    pub fn add(&self, condition: Condition) -> usize {
        let mut slots = self.slots.write();
        slots.push(Some(Arc::new(condition)));
        slots.len() - 1
    }

    /// Convenience for synchronous predicates.
    pub fn add_sync<F>(&self, predicate: F) -> usize
    where
        F: Fn(&QueueItem, Option<&QueueItem>) -> Result<bool, CrawlError>
            + Send
            + Sync
            + 'static,
    {
        self.add(Condition::Sync(Box::new(predicate)))
    }

    /// Convenience for asynchronous predicates.
    pub fn add_async<F>(&self, predicate: F) -> usize
    where
        F: Fn(QueueItem, Option<QueueItem>) -> BoxFuture<'static, Result<bool, CrawlError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Condition::Async(Box::new(predicate)))
    }

    /// Nullifies a slot. Later ids are unaffected; removing a slot that is
    /// already empty (or never existed) is a caller bug.
    pub fn remove(&self, id: usize) -> Result<(), CrawlError> {
        let mut slots = self.slots.write();
        match slots.get_mut(id) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(CrawlError::UnknownCondition(id)),
        }
    }

    /// Number of live (non-empty) slots.
    pub fn live_count(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    /// Runs every live predicate in slot order. Short-circuits on the first
    /// false result or error.
    pub async fn evaluate(
        &self,
        item: &QueueItem,
        referrer: Option<&QueueItem>,
    ) -> Result<bool, CrawlError> {
        // Snapshot so no lock is held across await points.
        let live: Vec<Arc<Condition>> = self.slots.read().iter().flatten().cloned().collect();

        for condition in live {
            let pass = match condition.as_ref() {
                Condition::Sync(predicate) => predicate(item, referrer)?,
                Condition::Async(predicate) => {
                    predicate(item.clone(), referrer.cloned()).await?
                }
            };
            if !pass {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
