//! # Robots Registry Module
//!
//! Per-origin robots.txt storage and admission decisions.
//!
//! Each origin (scheme + host + port) is fetched at most once; the parsed
//! entry is appended to an ordered list and admission asks the entries in
//! insertion order, taking the first definitive answer. An entry with no
//! rules (non-2xx response) defers, and a URL no entry speaks for is
//! allowed. Sitemap declarations and `Crawl-delay` directives are extracted
//! at registration time.

use dashmap::DashSet;
use parking_lot::RwLock;
use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

use crate::item::origin_of;

/// Computes the robots origin key for a URL, dropping scheme-default ports.
pub fn origin_for_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default().unwrap_or(0);
    Some(origin_of(parsed.scheme(), host, port))
}

/// The robots.txt location for an origin.
pub fn robots_url(origin: &str) -> String {
    format!("{}/robots.txt", origin)
}

/// A fetched robots.txt for one origin.
#[derive(Debug, Clone)]
pub struct RobotsEntry {
    origin: String,
    /// The raw rules; `None` when the origin answered non-2xx and is
    /// therefore treated as permissive.
    body: Option<String>,
    sitemaps: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsEntry {
    pub fn new(origin: impl Into<String>, body: Option<String>) -> Self {
        let (sitemaps, crawl_delay) = match &body {
            Some(body) => (extract_sitemaps(body), extract_crawl_delay(body)),
            None => (Vec::new(), None),
        };
        RobotsEntry {
            origin: origin.into(),
            body,
            sitemaps,
            crawl_delay,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// This entry's verdict for a URL, or `None` when it has nothing to say
    /// (different origin, or no rules were served).
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> Option<bool> {
        if origin_for_url(url).as_deref() != Some(self.origin.as_str()) {
            return None;
        }
        let body = self.body.as_deref()?;
        let mut matcher = DefaultMatcher::default();
        Some(matcher.one_agent_allowed_by_robots(body, user_agent, url))
    }

    /// Sitemap URLs declared by this robots.txt.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// The declared crawl delay, seconds. Exposed for callers; the engine
    /// does not rate-limit on it.
    pub fn crawl_delay(&self) -> Option<f64> {
        self.crawl_delay
    }
}

fn extract_sitemaps(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.to_lowercase().starts_with("sitemap:"))
        .filter_map(|line| line.splitn(2, ':').nth(1))
        .map(str::trim)
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
        .collect()
}

fn extract_crawl_delay(body: &str) -> Option<f64> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.to_lowercase().starts_with("crawl-delay:"))
        .find_map(|line| line.splitn(2, ':').nth(1)?.trim().parse::<f64>().ok())
}

/// Ordered list of robots entries plus the touched-origin set.
#[derive(Debug, Default)]
pub struct RobotsRegistry {
    entries: RwLock<Vec<RobotsEntry>>,
    touched: DashSet<String>,
}

impl RobotsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an origin as touched; returns true on the first touch.
    pub fn touch(&self, origin: &str) -> bool {
        self.touched.insert(origin.to_string())
    }

    /// Appends an entry; consultation order is registration order.
    pub fn register(&self, entry: RobotsEntry) {
        debug!(origin = %entry.origin, has_rules = entry.body.is_some(), "robots entry registered");
        self.entries.write().push(entry);
    }

    /// First definitive answer across the list wins; a URL nothing speaks
    /// for is allowed.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        for entry in self.entries.read().iter() {
            if let Some(verdict) = entry.is_allowed(url, user_agent) {
                return verdict;
            }
        }
        true
    }

    /// Sitemaps registered for any origin so far.
    pub fn sitemaps(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .flat_map(|entry| entry.sitemaps().to_vec())
            .collect()
    }

    /// The crawl delay for an origin, when one was declared.
    pub fn crawl_delay(&self, origin: &str) -> Option<f64> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.origin() == origin)
            .find_map(|entry| entry.crawl_delay())
    }
}
