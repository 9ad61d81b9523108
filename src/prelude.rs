//! A "prelude" for users of the `scuttle` crate.
//!
//! This prelude re-exports the most commonly used types so that they can be
//! easily imported.
//!
//! # Example
//!
//! ```
//! use scuttle::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    // Observability
    CrawlEvent,
    // Queue contract
    FetchQueue,
    MemoryQueue,
    QueueItem,
    Status,
    // Essential re-export for trait implementation
    async_trait,
};
