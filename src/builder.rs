//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and
//! configuring [`Crawler`] instances.
//!
//! ## Overview
//!
//! The builder validates configuration at `build()` time: a missing or
//! unparsable seed URL, a zero interval, or a zero concurrency cap are
//! caller bugs and surface as `CrawlError::Configuration`. It also assembles
//! the shared HTTP client (redirects disabled, proxy and TLS settings
//! applied) together with the pluggable queue and cache collaborators.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scuttle::CrawlerBuilder;
//!
//! let crawler = CrawlerBuilder::new("http://example.com/")
//!     .max_concurrency(2)
//!     .max_depth(3)
//!     .respect_robots_txt(false)
//!     .build()?;
//! crawler.start();
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::{CrawlConfig, UrlEncoding};
use crate::crawler::Crawler;
use crate::discover::Discoverer;
use crate::error::CrawlError;
use crate::queue::{FetchQueue, MemoryQueue};
use crate::urlproc::process_url;

/// Fluent constructor for [`Crawler`].
pub struct CrawlerBuilder {
    seed: String,
    config: CrawlConfig,
    queue: Option<Arc<dyn FetchQueue>>,
    cache: Option<Arc<dyn Cache>>,
}

impl CrawlerBuilder {
    /// Starts a builder for a crawl rooted at `seed`.
    pub fn new(seed: impl Into<String>) -> Self {
        CrawlerBuilder {
            seed: seed.into(),
            config: CrawlConfig::default(),
            queue: None,
            cache: None,
        }
    }

    /// Replaces the whole configuration at once.
    pub fn config(mut self, config: CrawlConfig) -> Self {
        self.config = config;
        self
    }

    /// Control-loop tick interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Maximum simultaneously open requests.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    /// Time allowed for response headers to arrive.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Lifetime of a wait hold before it auto-expires.
    pub fn listener_ttl(mut self, ttl: Duration) -> Self {
        self.config.listener_ttl = ttl;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn respect_robots_txt(mut self, respect: bool) -> Self {
        self.config.respect_robots_txt = respect;
        self
    }

    pub fn allow_initial_domain_change(mut self, allow: bool) -> Self {
        self.config.allow_initial_domain_change = allow;
        self
    }

    pub fn decompress_responses(mut self, decompress: bool) -> Self {
        self.config.decompress_responses = decompress;
        self
    }

    pub fn decode_responses(mut self, decode: bool) -> Self {
        self.config.decode_responses = decode;
        self
    }

    pub fn filter_by_domain(mut self, filter: bool) -> Self {
        self.config.filter_by_domain = filter;
        self
    }

    pub fn scan_subdomains(mut self, scan: bool) -> Self {
        self.config.scan_subdomains = scan;
        self
    }

    pub fn ignore_www_domain(mut self, ignore: bool) -> Self {
        self.config.ignore_www_domain = ignore;
        self
    }

    pub fn strip_www_domain(mut self, strip: bool) -> Self {
        self.config.strip_www_domain = strip;
        self
    }

    /// Routes requests through an HTTP proxy.
    pub fn proxy(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.config.use_proxy = true;
        self.config.proxy_hostname = hostname.into();
        self.config.proxy_port = port;
        self
    }

    pub fn proxy_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.config.proxy_user = Some(user.into());
        self.config.proxy_pass = Some(pass.into());
        self
    }

    /// Sends HTTP Basic Auth with every request.
    pub fn basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.config.needs_auth = true;
        self.config.auth_user = Some(user.into());
        self.config.auth_pass = Some(pass.into());
        self
    }

    pub fn accept_cookies(mut self, accept: bool) -> Self {
        self.config.accept_cookies = accept;
        self
    }

    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn custom_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.config.custom_headers = headers;
        self
    }

    /// Admits an extra domain alongside the seed's.
    pub fn whitelist_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain_whitelist.push(domain.into());
        self
    }

    pub fn allowed_protocols(mut self, protocols: Vec<regex::Regex>) -> Self {
        self.config.allowed_protocols = protocols;
        self
    }

    pub fn max_resource_size(mut self, bytes: u64) -> Self {
        self.config.max_resource_size = bytes;
        self
    }

    pub fn supported_mime_types(mut self, types: Vec<regex::Regex>) -> Self {
        self.config.supported_mime_types = types;
        self
    }

    pub fn download_unsupported(mut self, download: bool) -> Self {
        self.config.download_unsupported = download;
        self
    }

    pub fn url_encoding(mut self, encoding: UrlEncoding) -> Self {
        self.config.url_encoding = encoding;
        self
    }

    pub fn strip_querystring(mut self, strip: bool) -> Self {
        self.config.strip_querystring = strip;
        self
    }

    pub fn sort_query_parameters(mut self, sort: bool) -> Self {
        self.config.sort_query_parameters = sort;
        self
    }

    pub fn parse_html_comments(mut self, parse: bool) -> Self {
        self.config.parse_html_comments = parse;
        self
    }

    pub fn parse_script_tags(mut self, parse: bool) -> Self {
        self.config.parse_script_tags = parse;
        self
    }

    /// Depth cap; 0 means unlimited.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn ignore_invalid_ssl(mut self, ignore: bool) -> Self {
        self.config.ignore_invalid_ssl = ignore;
        self
    }

    /// Replaces the resource extractor matcher list.
    pub fn discoverers(mut self, discoverers: Vec<Discoverer>) -> Self {
        self.config.discoverers = discoverers;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Swaps in a queue implementation (a durable backend, for instance).
    pub fn queue(mut self, queue: Arc<dyn FetchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attaches a cache collaborator for conditional fetches.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates the configuration and assembles the crawler.
    pub fn build(self) -> Result<Crawler, CrawlError> {
        let seed = self.seed.trim().to_string();
        if seed.is_empty() {
            return Err(CrawlError::Configuration(
                "a seed URL must be specified".to_string(),
            ));
        }
        let processed = process_url(&seed, None, &self.config).ok_or_else(|| {
            CrawlError::Configuration(format!("seed URL cannot be parsed: {}", seed))
        })?;

        if self.config.interval.is_zero() {
            return Err(CrawlError::Configuration(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.config.max_concurrency == 0 {
            return Err(CrawlError::Configuration(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }

        let mut client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(self.config.user_agent.clone());
        if self.config.ignore_invalid_ssl {
            client = client.danger_accept_invalid_certs(true);
        }
        if self.config.use_proxy {
            let proxy_url = format!(
                "http://{}:{}",
                self.config.proxy_hostname, self.config.proxy_port
            );
            let mut proxy = reqwest::Proxy::all(&proxy_url)?;
            if let (Some(user), Some(pass)) =
                (&self.config.proxy_user, &self.config.proxy_pass)
            {
                proxy = proxy.basic_auth(user, pass);
            }
            client = client.proxy(proxy);
        }
        let client = client.build()?;

        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MemoryQueue::new()) as Arc<dyn FetchQueue>);

        Ok(Crawler::from_parts(
            self.config,
            processed.url.clone(),
            processed.host,
            queue,
            self.cache,
            client,
        ))
    }
}
