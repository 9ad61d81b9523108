//! # Configuration Module
//!
//! All tunables of the crawl engine, with the defaults a polite crawler
//! wants out of the box. `CrawlConfig` is plain data; the builder provides
//! the fluent construction surface and validation.

use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

use crate::discover::{default_discoverers, Discoverer};

/// How URLs are percent-encoded during canonicalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlEncoding {
    /// UTF-8 percent-encoding (the `url` crate default).
    Unicode,
    /// Single-byte ISO-8859-1 escapes where the character fits.
    Iso8859,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Control-loop tick interval.
    pub interval: Duration,
    /// Maximum simultaneously open requests.
    pub max_concurrency: usize,
    /// Time allowed for response headers to arrive.
    pub timeout: Duration,
    /// Lifetime of a wait hold before it auto-expires.
    pub listener_ttl: Duration,
    pub user_agent: String,
    pub respect_robots_txt: bool,
    /// Adopt the redirect host as canonical when the very first request
    /// redirects off-site.
    pub allow_initial_domain_change: bool,
    /// Deliver decompressed bodies via `FetchComplete`.
    pub decompress_responses: bool,
    /// Decode bodies to text using the indicated charset.
    pub decode_responses: bool,
    pub filter_by_domain: bool,
    pub scan_subdomains: bool,
    /// Treat `www.host` and `host` as the same domain.
    pub ignore_www_domain: bool,
    /// Remove `www.` from hosts during URL processing.
    pub strip_www_domain: bool,
    pub use_proxy: bool,
    pub proxy_hostname: String,
    pub proxy_port: u16,
    pub proxy_user: Option<String>,
    pub proxy_pass: Option<String>,
    pub needs_auth: bool,
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    pub accept_cookies: bool,
    pub custom_headers: HashMap<String, String>,
    pub domain_whitelist: Vec<String>,
    /// Schemes admitted during discovery, as regular expressions.
    pub allowed_protocols: Vec<Regex>,
    /// Hard cap on response bodies, bytes.
    pub max_resource_size: u64,
    /// Content types handed to the resource extractor.
    pub supported_mime_types: Vec<Regex>,
    /// Download bodies whose type the extractor does not support.
    pub download_unsupported: bool,
    pub url_encoding: UrlEncoding,
    pub strip_querystring: bool,
    pub sort_query_parameters: bool,
    /// When false, HTML comments are stripped before discovery.
    pub parse_html_comments: bool,
    /// When false, script blocks are stripped before discovery.
    pub parse_script_tags: bool,
    /// 0 means unlimited.
    pub max_depth: usize,
    pub ignore_invalid_ssl: bool,
    /// The resource extractor matcher list.
    pub discoverers: Vec<Discoverer>,
    /// Broadcast capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            interval: Duration::from_millis(250),
            max_concurrency: 5,
            timeout: Duration::from_secs(300),
            listener_ttl: Duration::from_secs(10),
            user_agent: concat!("scuttle/", env!("CARGO_PKG_VERSION")).to_string(),
            respect_robots_txt: true,
            allow_initial_domain_change: false,
            decompress_responses: true,
            decode_responses: false,
            filter_by_domain: true,
            scan_subdomains: false,
            ignore_www_domain: true,
            strip_www_domain: false,
            use_proxy: false,
            proxy_hostname: "127.0.0.1".to_string(),
            proxy_port: 8123,
            proxy_user: None,
            proxy_pass: None,
            needs_auth: false,
            auth_user: None,
            auth_pass: None,
            accept_cookies: true,
            custom_headers: HashMap::new(),
            domain_whitelist: Vec::new(),
            allowed_protocols: vec![
                Regex::new(r"^https?$").unwrap(),
                Regex::new(r"^(rss|atom|feed)(\+xml)?$").unwrap(),
            ],
            max_resource_size: 16 * 1024 * 1024,
            supported_mime_types: vec![
                Regex::new(r"(?i)^text/").unwrap(),
                Regex::new(r"(?i)^application/(rss|html|xhtml)\+xml$").unwrap(),
                Regex::new(r"(?i)^application/javascript$").unwrap(),
                Regex::new(r"(?i)^xml/").unwrap(),
            ],
            download_unsupported: true,
            url_encoding: UrlEncoding::Unicode,
            strip_querystring: false,
            sort_query_parameters: false,
            parse_html_comments: true,
            parse_script_tags: true,
            max_depth: 0,
            ignore_invalid_ssl: false,
            discoverers: default_discoverers(),
            event_capacity: 1024,
        }
    }
}

impl CrawlConfig {
    /// True when the content type (sans parameters) is one the extractor
    /// understands.
    pub fn is_supported_mime(&self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        self.supported_mime_types
            .iter()
            .any(|re| re.is_match(essence))
    }
}
