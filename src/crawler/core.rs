//! The central orchestrator: the `Crawler` handle, its control loop, and the
//! admission pipeline through which every discovered URL passes.
//!
//! The control loop runs on a fixed interval. Each tick it picks the oldest
//! unfetched item, gates it on robots.txt (fetching and registering the
//! origin's rules on first contact), and hands it to the request engine,
//! respecting the concurrency cap. Re-entrancy flags guard the robots fetch
//! and the queue pick so a slow queue cannot cause the same item to be
//! issued twice. When the queue holds no unfetched work, nothing is in
//! flight, and no wait holds are outstanding, `Complete` fires (once per
//! start) and the loop stops itself.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::cache::Cache;
use crate::conditions::ConditionSet;
use crate::config::CrawlConfig;
use crate::cookies::CookieJar;
use crate::error::{CrawlError, QueueError};
use crate::events::{CrawlEvent, EventBus};
use crate::item::{QueueItem, QueueItemUpdate, Status};
use crate::queue::FetchQueue;
use crate::robots::{robots_url, RobotsEntry, RobotsRegistry};
use crate::urlproc::process_url;

use super::request;

/// Shared engine state. Everything a control-loop tick or an in-flight
/// request task needs lives behind this `Arc`.
pub(crate) struct Engine {
    pub(crate) config: CrawlConfig,
    pub(crate) seed_url: String,
    /// Canonical host; may change once via `allow_initial_domain_change`.
    pub(crate) host: RwLock<String>,
    pub(crate) queue: Arc<dyn FetchQueue>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) cookies: Arc<CookieJar>,
    pub(crate) robots: RobotsRegistry,
    pub(crate) fetch_conditions: ConditionSet,
    pub(crate) download_conditions: ConditionSet,
    pub(crate) events: EventBus,
    pub(crate) client: reqwest::Client,

    running: AtomicBool,
    /// `Complete` already fired for this start.
    completed: AtomicBool,
    fetching_robots: AtomicBool,
    fetching_queue_item: AtomicBool,
    pub(crate) first_request_issued: AtomicBool,
    wait_holds: Arc<AtomicUsize>,
    pub(crate) open_requests: Mutex<HashMap<u64, AbortHandle>>,
    request_seq: AtomicU64,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// A declaration that asynchronous discovery is in progress; blocks
/// completion until released or until `listener_ttl` elapses.
pub struct WaitHold {
    counter: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl WaitHold {
    /// Releases the hold. Idempotent with the TTL expiry.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// The public crawl handle.
///
/// Cloning is cheap; clones share the same engine. Outcomes are observed
/// through [`Crawler::subscribe`], not through return values.
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<Engine>,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler").finish_non_exhaustive()
    }
}

impl Crawler {
    pub(crate) fn from_parts(
        config: CrawlConfig,
        seed_url: String,
        host: String,
        queue: Arc<dyn FetchQueue>,
        cache: Option<Arc<dyn Cache>>,
        client: reqwest::Client,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let cookies = Arc::new(CookieJar::new());
        cookies.attach_events(events.clone());

        Crawler {
            inner: Arc::new(Engine {
                config,
                seed_url,
                host: RwLock::new(host),
                queue,
                cache,
                cookies,
                robots: RobotsRegistry::new(),
                fetch_conditions: ConditionSet::new(),
                download_conditions: ConditionSet::new(),
                events,
                client,
                running: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                fetching_robots: AtomicBool::new(false),
                fetching_queue_item: AtomicBool::new(false),
                first_request_issued: AtomicBool::new(false),
                wait_holds: Arc::new(AtomicUsize::new(0)),
                open_requests: Mutex::new(HashMap::new()),
                request_seq: AtomicU64::new(0),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Subscribes to the event surface.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CrawlEvent> {
        self.inner.events.subscribe()
    }

    /// The queue backing this crawl.
    pub fn queue(&self) -> Arc<dyn FetchQueue> {
        self.inner.queue.clone()
    }

    /// The session cookie jar.
    pub fn cookies(&self) -> Arc<CookieJar> {
        self.inner.cookies.clone()
    }

    /// The engine's current canonical host.
    pub fn host(&self) -> String {
        self.inner.host.read().clone()
    }

    /// True while the control loop is scheduled.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Registers a fetch condition; returns its stable id.
    pub fn add_fetch_condition(&self, condition: crate::conditions::Condition) -> usize {
        self.inner.fetch_conditions.add(condition)
    }

    /// Removes a fetch condition by id.
    pub fn remove_fetch_condition(&self, id: usize) -> Result<(), CrawlError> {
        self.inner.fetch_conditions.remove(id)
    }

    /// Registers a download condition; returns its stable id.
    pub fn add_download_condition(&self, condition: crate::conditions::Condition) -> usize {
        self.inner.download_conditions.add(condition)
    }

    /// Removes a download condition by id.
    pub fn remove_download_condition(&self, id: usize) -> Result<(), CrawlError> {
        self.inner.download_conditions.remove(id)
    }

    /// Whether robots rules admitted so far allow this URL.
    pub fn url_is_allowed(&self, url: &str) -> bool {
        self.inner
            .robots
            .is_allowed(url, &self.inner.config.user_agent)
    }

    /// Submits a URL through the admission pipeline. The outcome is
    /// observable as events (`QueueAdd`, `QueueDuplicate`, `InvalidDomain`,
    /// `FetchDisallowed`, `FetchPrevented`, ...), not as a return value.
    pub async fn queue_url(&self, url: &str, referrer: Option<&QueueItem>, force: bool) {
        let _ = self.inner.admit(url, referrer, force).await;
    }

    /// Takes a wait hold, keeping the crawl alive while external discovery
    /// runs. The hold auto-expires after `listener_ttl`.
    pub fn wait(&self) -> WaitHold {
        let counter = self.inner.wait_holds.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        let released = Arc::new(AtomicBool::new(false));

        let ttl = self.inner.config.listener_ttl;
        let counter_for_ttl = counter.clone();
        let released_for_ttl = released.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if !released_for_ttl.swap(true, Ordering::SeqCst) {
                counter_for_ttl.fetch_sub(1, Ordering::SeqCst);
            }
        });

        WaitHold { counter, released }
    }

    /// Starts (or resumes) the crawl. Idempotent while running; every start
    /// emits `CrawlStart`.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.completed.store(false, Ordering::SeqCst);

        let engine = self.inner.clone();
        let handle = tokio::spawn(async move {
            if engine.queue.len().await.unwrap_or(0) == 0 {
                let seed = engine.seed_url.clone();
                let _ = engine.admit(&seed, None, false).await;
            }
            info!(host = %engine.host.read(), "crawl started");
            engine.events.emit(CrawlEvent::CrawlStart);

            let mut interval = tokio::time::interval(engine.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while engine.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !engine.running.load(Ordering::SeqCst) {
                    break;
                }
                engine.tick().await;
            }
            trace!("control loop exited");
        });
        *self.inner.loop_handle.lock() = Some(handle);
    }

    /// Stops scheduling new requests. With `abort = true`, additionally
    /// aborts every tracked in-flight request; those die silently.
    pub fn stop(&self, abort: bool) {
        self.inner.halt(abort);
        if let Some(handle) = self.inner.loop_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Engine {
    pub(crate) fn halt(&self, abort: bool) {
        self.running.store(false, Ordering::SeqCst);
        if abort {
            let handles: Vec<AbortHandle> =
                self.open_requests.lock().drain().map(|(_, h)| h).collect();
            debug!(aborted = handles.len(), "aborting in-flight requests");
            for handle in handles {
                handle.abort();
            }
        }
    }

    pub(crate) fn open_request_count(&self) -> usize {
        self.open_requests.lock().len()
    }

    /// One control-loop tick.
    async fn tick(self: &Arc<Self>) {
        if self.open_request_count() >= self.config.max_concurrency {
            return;
        }
        if self.fetching_robots.load(Ordering::SeqCst)
            || self.fetching_queue_item.load(Ordering::SeqCst)
        {
            return;
        }

        self.fetching_queue_item.store(true, Ordering::SeqCst);
        let picked = self.queue.oldest_unfetched().await;
        match picked {
            Ok(Some(item)) => {
                if self.config.respect_robots_txt {
                    let origin = item.origin();
                    if self.robots.touch(&origin) {
                        // First contact with this origin: fetch its rules
                        // before issuing anything against it. The item stays
                        // queued and is re-picked on a later tick.
                        self.fetching_robots.store(true, Ordering::SeqCst);
                        let engine = self.clone();
                        tokio::spawn(async move {
                            engine.fetch_robots_txt(&origin).await;
                            engine.fetching_robots.store(false, Ordering::SeqCst);
                        });
                        self.fetching_queue_item.store(false, Ordering::SeqCst);
                        return;
                    }

                    if !self.robots.is_allowed(&item.url, &self.config.user_agent) {
                        let updated = self
                            .queue
                            .update(item.id, QueueItemUpdate::terminal(Status::Disallowed))
                            .await;
                        if let Ok(updated) = updated {
                            self.events
                                .emit(CrawlEvent::FetchDisallowed { item: updated });
                        }
                        self.fetching_queue_item.store(false, Ordering::SeqCst);
                        return;
                    }
                }

                // Spool before the next pick so a slow queue cannot hand the
                // same item out twice.
                match self
                    .queue
                    .update(
                        item.id,
                        QueueItemUpdate {
                            status: Some(Status::Spooled),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Ok(spooled) => self.spawn_request(spooled),
                    Err(error) => warn!(%error, id = item.id, "failed to spool item"),
                }
                self.fetching_queue_item.store(false, Ordering::SeqCst);
            }
            Ok(None) => {
                self.fetching_queue_item.store(false, Ordering::SeqCst);
                self.check_complete().await;
            }
            Err(error) => {
                self.fetching_queue_item.store(false, Ordering::SeqCst);
                warn!(%error, "queue pick failed");
            }
        }
    }

    fn spawn_request(self: &Arc<Self>, item: QueueItem) {
        let seq = self.request_seq.fetch_add(1, Ordering::SeqCst);
        let engine = self.clone();
        // The task waits for its abort handle to be registered before it can
        // finish and deregister itself.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;
            request::run_request(&engine, item).await;
            engine.open_requests.lock().remove(&seq);
        });
        self.open_requests.lock().insert(seq, handle.abort_handle());
        let _ = registered_tx.send(());
    }

    async fn check_complete(&self) {
        if self.open_request_count() > 0 || self.wait_holds.load(Ordering::SeqCst) > 0 {
            return;
        }
        let (completed, total) = match (
            self.queue.count_completed().await,
            self.queue.len().await,
        ) {
            (Ok(completed), Ok(total)) => (completed, total),
            _ => return,
        };
        if completed == total && !self.completed.swap(true, Ordering::SeqCst) {
            info!(items = total, "crawl complete");
            self.events.emit(CrawlEvent::Complete);
            self.halt(false);
        }
    }

    /// Fetches and registers robots.txt for an origin, following redirects
    /// only into admitted domains, then enqueues any declared sitemaps.
    async fn fetch_robots_txt(self: &Arc<Self>, origin: &str) {
        let start_url = robots_url(origin);
        let mut current = start_url.clone();
        let mut body = None;

        for _ in 0..5u8 {
            let response = match request::plain_get(self, &current).await {
                Ok(response) => response,
                Err(error) => {
                    self.events.emit(CrawlEvent::RobotsTxtError {
                        error: error.to_string(),
                    });
                    self.robots.register(RobotsEntry::new(origin, None));
                    return;
                }
            };

            let code = response.status().as_u16();
            if (300..400).contains(&code) {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let Some(location) = location else { break };
                let Ok(target) =
                    url::Url::parse(&current).and_then(|base| base.join(&location))
                else {
                    break;
                };
                let target_host = target.host_str().unwrap_or_default().to_string();
                if !self.domain_valid(&target_host) {
                    self.events.emit(CrawlEvent::RobotsTxtError {
                        error: format!(
                            "robots.txt redirected to a disallowed domain: {}",
                            target_host
                        ),
                    });
                    self.robots.register(RobotsEntry::new(origin, None));
                    return;
                }
                current = target.to_string();
                continue;
            }

            if (200..300).contains(&code) {
                body = response.text().await.ok();
            }
            // Non-2xx terminal: no rules, the origin is permissive.
            break;
        }

        let entry = RobotsEntry::new(origin, body);
        let sitemaps = entry.sitemaps().to_vec();
        self.robots.register(entry);

        if !sitemaps.is_empty() {
            debug!(origin, count = sitemaps.len(), "enqueueing robots.txt sitemaps");
            let referrer = process_url(&start_url, None, &self.config);
            for sitemap in sitemaps {
                let _ = self.admit(&sitemap, referrer.as_ref(), false).await;
            }
        }
    }

    /// Domain-validity rules, OR-combined and short-circuiting.
    pub(crate) fn domain_valid(&self, host: &str) -> bool {
        fn strip_www(host: &str) -> &str {
            host.strip_prefix("www.").unwrap_or(host)
        }

        if !self.config.filter_by_domain {
            return true;
        }
        let engine_host = self.host.read().clone();
        if host == engine_host {
            return true;
        }
        if self.config.ignore_www_domain && strip_www(host) == strip_www(&engine_host) {
            return true;
        }
        if self.config.domain_whitelist.iter().any(|allowed| {
            allowed == host
                || (self.config.ignore_www_domain && strip_www(allowed) == strip_www(host))
        }) {
            return true;
        }
        self.config.scan_subdomains && host.ends_with(&format!(".{}", engine_host))
    }

    /// The admission pipeline: parse, domain validity, robots, depth, fetch
    /// conditions, queue insertion. Every rejection is an event.
    pub(crate) async fn admit(
        &self,
        raw: &str,
        referrer: Option<&QueueItem>,
        force: bool,
    ) -> Option<QueueItem> {
        let Some(item) = process_url(raw, referrer, &self.config) else {
            trace!(url = raw, "admission: unparsable URL");
            return None;
        };
        self.admit_item(item, referrer, force).await
    }

    /// Admission stages after URL processing; used directly for redirect
    /// targets whose depth was adjusted by the caller.
    pub(crate) async fn admit_item(
        &self,
        item: QueueItem,
        referrer: Option<&QueueItem>,
        force: bool,
    ) -> Option<QueueItem> {
        if !self.domain_valid(&item.host) {
            self.events.emit(CrawlEvent::InvalidDomain {
                url: item.url.clone(),
            });
            return None;
        }

        if !self.robots.is_allowed(&item.url, &self.config.user_agent) {
            self.events.emit(CrawlEvent::FetchDisallowed { item });
            return None;
        }

        if self.config.max_depth > 0 && item.depth > self.config.max_depth {
            self.events.emit(CrawlEvent::FetchPrevented {
                url: item.url.clone(),
            });
            return None;
        }

        match self.fetch_conditions.evaluate(&item, referrer).await {
            Ok(true) => {}
            Ok(false) => {
                self.events.emit(CrawlEvent::FetchPrevented {
                    url: item.url.clone(),
                });
                return None;
            }
            Err(error) => {
                self.events.emit(CrawlEvent::FetchConditionError {
                    url: item.url.clone(),
                    error: error.to_string(),
                });
                return None;
            }
        }

        let url = item.url.clone();
        match self.queue.add(item, force).await {
            Ok(added) => {
                self.events.emit(CrawlEvent::QueueAdd {
                    item: added.clone(),
                    referrer: referrer.map(|r| r.url.clone()),
                });
                Some(added)
            }
            Err(QueueError::Duplicate(_)) => {
                self.events.emit(CrawlEvent::QueueDuplicate { url });
                None
            }
            Err(error) => {
                self.events.emit(CrawlEvent::QueueError {
                    url,
                    error: error.to_string(),
                });
                None
            }
        }
    }
}
