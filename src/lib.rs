//! # scuttle
//!
//! An event-driven, single-seed web crawler library.
//!
//! Given one starting URL, the crawler discovers linked resources, enforces
//! scoping rules (domain, protocol, MIME type, depth, robots.txt, and
//! user-supplied predicates), fetches each admitted resource with bounded
//! concurrency, and exposes every lifecycle transition as an observable
//! event, as a foundation for indexers, mirrors, scrapers, and link checkers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scuttle::{CrawlEvent, CrawlerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scuttle::CrawlError> {
//!     let crawler = CrawlerBuilder::new("http://example.com/")
//!         .max_concurrency(2)
//!         .max_depth(3)
//!         .build()?;
//!
//!     let mut events = crawler.subscribe();
//!     crawler.start();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             CrawlEvent::FetchComplete { item, body, .. } => {
//!                 println!("{} ({} bytes)", item.url, body.len());
//!             }
//!             CrawlEvent::Complete => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod conditions;
pub mod config;
pub mod cookies;
pub mod crawler;
pub mod discover;
pub mod error;
pub mod events;
pub mod item;
pub mod prelude;
pub mod queue;
pub mod robots;
pub mod urlproc;

pub use builder::CrawlerBuilder;
pub use cache::{Cache, MemoryCache};
pub use conditions::{Condition, ConditionSet};
pub use config::{CrawlConfig, UrlEncoding};
pub use cookies::{Cookie, CookieJar};
pub use crawler::{Crawler, WaitHold};
pub use discover::{default_discoverers, Discoverer};
pub use error::{CrawlError, QueueError};
pub use events::{CacheObject, CrawlEvent, EventBus, ResponseHead};
pub use item::{ItemFilter, QueueItem, QueueItemUpdate, StateData, Status};
pub use queue::{FetchQueue, MemoryQueue, Statistic};
pub use robots::{RobotsEntry, RobotsRegistry};
pub use urlproc::process_url;

pub use async_trait::async_trait;
pub use tokio;
