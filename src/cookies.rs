//! # Cookie Module
//!
//! A permissive cookie jar for maintaining session state across requests.
//!
//! The matching rules here are deliberately looser than RFC 6265: a stored
//! domain of `*` matches every host, and domain comparison is a suffix test
//! so `.example.com` covers `example.com` and all of its subdomains. Server
//! quirks are tolerated during parsing (attribute keys are lowercased and
//! stripped of non-alphanumerics, so `expires` and `expiry` are
//! interchangeable and a bare `HttpOnly` sets the flag).

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use tracing::trace;

use crate::error::CrawlError;
use crate::events::{CrawlEvent, EventBus};

/// Sentinel for session cookies that never expire.
pub const SESSION: i64 = -1;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Expiry as epoch milliseconds; [`SESSION`] means never.
    pub expires: i64,
    pub path: String,
    pub domain: String,
    pub httponly: bool,
}

impl Cookie {
    /// Creates a cookie, defaulting `path` to `/` and `domain` to `*`.
    pub fn new(
        name: &str,
        value: &str,
        expires: Option<i64>,
        path: Option<&str>,
        domain: Option<&str>,
        httponly: bool,
    ) -> Result<Cookie, CrawlError> {
        if name.trim().is_empty() {
            return Err(CrawlError::Cookie("cookie name must be specified".into()));
        }
        Ok(Cookie {
            name: name.trim().to_string(),
            value: value.to_string(),
            expires: expires.unwrap_or(SESSION),
            path: path.filter(|p| !p.is_empty()).unwrap_or("/").to_string(),
            domain: domain.filter(|d| !d.is_empty()).unwrap_or("*").to_string(),
            httponly,
        })
    }

    /// Parses a `Set-Cookie` header line.
    pub fn from_string(header: &str) -> Result<Cookie, CrawlError> {
        let mut header = header.trim();
        if header.is_empty() {
            return Err(CrawlError::Cookie("empty Set-Cookie value".into()));
        }
        let lower = header.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("set-cookie:") {
            header = &header[header.len() - rest.len()..];
        }

        let mut segments = header.split(';');
        let first = segments
            .next()
            .ok_or_else(|| CrawlError::Cookie("missing name=value pair".into()))?;
        // The value may itself contain `=`.
        let (name, value) = match first.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (first.trim(), ""),
        };

        let mut expires = SESSION;
        let mut path: Option<String> = None;
        let mut domain: Option<String> = None;
        let mut httponly = false;

        for segment in segments {
            let (raw_key, raw_value) = match segment.split_once('=') {
                Some((k, v)) => (k, v.trim()),
                None => (segment, ""),
            };
            let key: String = raw_key
                .to_ascii_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();

            match key.as_str() {
                "expires" | "expiry" => {
                    if let Some(ms) = parse_expiry(raw_value) {
                        expires = ms;
                    }
                }
                "maxage" => {
                    if let Ok(secs) = raw_value.parse::<i64>() {
                        expires = now_ms() + secs * 1000;
                    }
                }
                "path" => path = Some(raw_value.to_string()),
                "domain" => domain = Some(raw_value.to_string()),
                "httponly" => httponly = true,
                _ => {}
            }
        }

        Cookie::new(
            name,
            value,
            Some(expires),
            path.as_deref(),
            domain.as_deref(),
            httponly,
        )
    }

    /// True when the cookie carries an expiry in the past.
    pub fn is_expired(&self) -> bool {
        self.expires >= 0 && self.expires < now_ms()
    }

    /// Suffix-based domain match; a stored `*` matches everything.
    pub fn matches_domain(&self, domain: &str) -> bool {
        if self.domain == "*" {
            return true;
        }
        let stored = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let candidate = domain.trim_start_matches('.').to_ascii_lowercase();
        candidate == stored || candidate.ends_with(&format!(".{}", stored))
    }

    /// Prefix-based path match; an empty stored path matches everything.
    pub fn matches_path(&self, path: &str) -> bool {
        self.path.is_empty() || path.starts_with(&self.path)
    }

    /// The outbound `name=value` form.
    pub fn to_value_string(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Serializes the cookie, optionally with its attributes in a shape
    /// `from_string` can parse back.
    pub fn to_string(&self, include_attributes: bool) -> String {
        if !include_attributes {
            return self.to_value_string();
        }
        let mut out = self.to_value_string();
        if self.expires >= 0 {
            if let Some(date) = Utc.timestamp_millis_opt(self.expires).single() {
                out.push_str(&format!("; expires={}", format_expiry(&date)));
            }
        }
        out.push_str(&format!("; path={}; domain={}", self.path, self.domain));
        if self.httponly {
            out.push_str("; httponly");
        }
        out
    }
}

fn format_expiry(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn parse_expiry(value: &str) -> Option<i64> {
    if let Ok(ms) = value.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.timestamp_millis());
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.timestamp_millis());
    }
    None
}

/// Unordered cookie collection keyed by (name, domain match).
///
/// Inserting a cookie whose key already exists overwrites the old entry.
/// Additions and removals are surfaced through the event bus when one is
/// attached.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<Cookie>>,
    events: RwLock<Option<EventBus>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach_events(&self, bus: EventBus) {
        *self.events.write() = Some(bus);
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(bus) = self.events.read().as_ref() {
            bus.emit(event);
        }
    }

    /// Adds a cookie, overwriting any entry with the same name whose domain
    /// matches the new cookie's domain.
    pub fn add(&self, cookie: Cookie) {
        trace!(name = %cookie.name, domain = %cookie.domain, "adding cookie");
        {
            let mut cookies = self.cookies.write();
            if let Some(existing) = cookies
                .iter_mut()
                .find(|c| c.name == cookie.name && c.matches_domain(&cookie.domain))
            {
                *existing = cookie.clone();
            } else {
                cookies.push(cookie.clone());
            }
        }
        self.emit(CrawlEvent::AddCookie { cookie });
    }

    /// Parses and adds a `Set-Cookie` line.
    pub fn add_from_string(&self, header: &str) -> Result<(), CrawlError> {
        self.add(Cookie::from_string(header)?);
        Ok(())
    }

    /// Feeds one or many `Set-Cookie` header values through `add`.
    pub fn add_from_headers<I, S>(&self, headers: I) -> Result<(), CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for header in headers {
            self.add_from_string(header.as_ref())?;
        }
        Ok(())
    }

    /// Cookies matching both filters; an unset filter matches everything.
    pub fn get(&self, name: Option<&str>, domain: Option<&str>) -> Vec<Cookie> {
        self.cookies
            .read()
            .iter()
            .filter(|c| name.map_or(true, |n| c.name == n))
            .filter(|c| domain.map_or(true, |d| c.matches_domain(d)))
            .cloned()
            .collect()
    }

    /// Removes matching cookies and returns them.
    pub fn remove(&self, name: Option<&str>, domain: Option<&str>) -> Vec<Cookie> {
        // Collect first, then apply, so removal indices stay valid.
        let removed: Vec<Cookie> = {
            let mut cookies = self.cookies.write();
            let (removed, kept) = std::mem::take(&mut *cookies).into_iter().partition(|c| {
                name.map_or(true, |n| c.name == n) && domain.map_or(true, |d| c.matches_domain(d))
            });
            *cookies = kept;
            removed
        };
        for cookie in &removed {
            self.emit(CrawlEvent::RemoveCookie {
                cookie: cookie.clone(),
            });
        }
        removed
    }

    /// Outbound `name=value` pairs for non-expired cookies, filtered by
    /// domain or path (when only one is given) or both. Callers join the
    /// pairs with `"; "`.
    pub fn get_as_header(&self, domain: Option<&str>, path: Option<&str>) -> Vec<String> {
        self.cookies
            .read()
            .iter()
            .filter(|c| !c.is_expired())
            .filter(|c| match (domain, path) {
                (Some(d), Some(p)) => c.matches_domain(d) && c.matches_path(p),
                (Some(d), None) => c.matches_domain(d),
                (None, Some(p)) => c.matches_path(p),
                (None, None) => true,
            })
            .map(|c| c.to_value_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }
}
