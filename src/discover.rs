//! # Resource Discovery Module
//!
//! The default link extractor: a pluggable sequence of regex and function
//! matchers that consume a document and yield candidate URL strings, plus
//! the cleanup pass that turns raw attribute matches into queueable URLs.
//!
//! This is deliberately heuristic. It does not parse HTML; it pattern-matches
//! `href`/`src` attributes, CSS `url(...)` references, bare absolute URLs,
//! `srcset` candidate lists, and meta-refresh redirects, which covers the
//! overwhelming majority of real documents at a fraction of a DOM parser's
//! cost. Callers needing more can replace the matcher list wholesale.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::CrawlConfig;
use crate::item::QueueItem;

/// One extractor: a pattern whose whole match is a candidate, or a function
/// producing candidates directly.
#[derive(Clone)]
pub enum Discoverer {
    Pattern(Regex),
    Custom(Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>),
}

impl fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discoverer::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Discoverer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

lazy_static! {
    static ref HREF_SRC_DQUOTE: Regex =
        Regex::new(r#"(?i)\s(?:href|src)\s*=\s*"[^"]*""#).unwrap();
    static ref HREF_SRC_SQUOTE: Regex =
        Regex::new(r"(?i)\s(?:href|src)\s*=\s*'[^']*'").unwrap();
    static ref HREF_SRC_BARE: Regex =
        Regex::new(r#"(?i)\s(?:href|src)\s*=\s*[^"'\s>][^\s>]*"#).unwrap();
    static ref CSS_URL: Regex = Regex::new(r"(?i)url\(\s*[^)]*\s*\)").unwrap();
    static ref ABSOLUTE_URL: Regex = Regex::new(r#"https?://[^?\s><'"]+"#).unwrap();
    static ref SRCSET: Regex = Regex::new(r#"(?i)srcset\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref META_REFRESH_EQUIV_FIRST: Regex = Regex::new(
        r#"(?i)<meta[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*url\s*=\s*([^"'>\s]+)"#
    )
    .unwrap();
    static ref META_REFRESH_CONTENT_FIRST: Regex = Regex::new(
        r#"(?i)<meta[^>]*content\s*=\s*["'][^"']*url\s*=\s*([^"'>\s]+)["'][^>]*http-equiv\s*=\s*["']?refresh["']?"#
    )
    .unwrap();
    static ref META_ROBOTS: Regex =
        Regex::new(r#"(?i)<meta[^>]*name\s*=\s*["']?robots["']?[^>]*>"#).unwrap();
    static ref META_CONTENT: Regex =
        Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref HTML_COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap();
    static ref ATTR_PREFIX: Regex = Regex::new(r"(?i)^\s*(?:href|src)\s*=+\s*").unwrap();
    static ref URL_WRAPPER: Regex = Regex::new(r"(?i)^url\(\s*(.*?)\s*\)$").unwrap();
    static ref JAVASCRIPT_CALL: Regex =
        Regex::new(r#"(?i)^javascript:\s*\w+\(\s*['"]([^'"]*)['"].*$"#).unwrap();
}

fn srcset_candidates(document: &str) -> Vec<String> {
    let mut found = Vec::new();
    for captures in SRCSET.captures_iter(document) {
        // Each comma-separated candidate is "url [descriptor]".
        for candidate in captures[1].split(',') {
            if let Some(url) = candidate.split_whitespace().next() {
                found.push(url.to_string());
            }
        }
    }
    found
}

fn meta_refresh_candidates(document: &str) -> Vec<String> {
    META_REFRESH_EQUIV_FIRST
        .captures_iter(document)
        .chain(META_REFRESH_CONTENT_FIRST.captures_iter(document))
        .map(|captures| captures[1].to_string())
        .collect()
}

/// The built-in matcher table.
pub fn default_discoverers() -> Vec<Discoverer> {
    vec![
        Discoverer::Pattern(HREF_SRC_DQUOTE.clone()),
        Discoverer::Pattern(HREF_SRC_SQUOTE.clone()),
        Discoverer::Pattern(HREF_SRC_BARE.clone()),
        Discoverer::Pattern(CSS_URL.clone()),
        Discoverer::Pattern(ABSOLUTE_URL.clone()),
        Discoverer::Custom(Arc::new(srcset_candidates)),
        Discoverer::Custom(Arc::new(meta_refresh_candidates)),
    ]
}

/// True when a `<meta name="robots">` tag asks crawlers not to follow links.
fn has_nofollow(document: &str) -> bool {
    META_ROBOTS.find_iter(document).any(|tag| {
        META_CONTENT
            .captures(tag.as_str())
            .map_or(false, |c| c[1].to_ascii_lowercase().contains("nofollow"))
    })
}

/// Runs the configured matchers over a document and returns raw candidates.
///
/// Returns nothing when the document opts out via
/// `<meta name="robots" content="nofollow">` and robots are respected.
pub fn discover_resources(document: &str, config: &CrawlConfig) -> Vec<String> {
    if config.respect_robots_txt && has_nofollow(document) {
        return Vec::new();
    }

    let mut document = std::borrow::Cow::Borrowed(document);
    if !config.parse_html_comments {
        document = HTML_COMMENT.replace_all(&document, "").into_owned().into();
    }
    if !config.parse_script_tags {
        document = SCRIPT_BLOCK.replace_all(&document, "").into_owned().into();
    }
    let document = document.as_ref();

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for discoverer in &config.discoverers {
        let candidates: Vec<String> = match discoverer {
            Discoverer::Pattern(re) => re
                .find_iter(document)
                .map(|m| m.as_str().to_string())
                .collect(),
            Discoverer::Custom(f) => f(document),
        };
        for candidate in candidates {
            if seen.insert(candidate.clone()) {
                found.push(candidate);
            }
        }
    }
    found
}

/// Strips attribute fluff from one candidate.
fn clean_candidate(candidate: &str) -> String {
    let mut cleaned = candidate.trim().to_string();
    cleaned = ATTR_PREFIX.replace(&cleaned, "").into_owned();
    cleaned = strip_quotes(cleaned.trim());
    if let Some(captures) = URL_WRAPPER.captures(&cleaned) {
        cleaned = captures[1].to_string();
        cleaned = strip_quotes(cleaned.trim());
    }
    if let Some(captures) = JAVASCRIPT_CALL.captures(&cleaned) {
        cleaned = captures[1].to_string();
    }

    // The five entity spellings real documents actually use for & and /.
    cleaned = cleaned
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&#x00026;", "&")
        .replace("&#x2f;", "/")
        .replace("&#47;", "/");

    // Fragments never reach the queue.
    if let Some(pos) = cleaned.find('#') {
        cleaned.truncate(pos);
    }
    cleaned
}

fn strip_quotes(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Cleans raw candidates, resolves them against the referrer, enforces the
/// protocol allow-list, and de-duplicates preserving first occurrence.
pub fn clean_and_expand(
    candidates: Vec<String>,
    referrer: &QueueItem,
    config: &CrawlConfig,
) -> Vec<String> {
    let base = Url::parse(&referrer.url).ok();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for candidate in candidates {
        let mut cleaned = clean_candidate(&candidate);
        if cleaned.is_empty() {
            continue;
        }
        if cleaned.starts_with("//") {
            cleaned = format!("{}:{}", referrer.protocol, cleaned);
        }

        let resolved = match &base {
            Some(base) => base.join(&cleaned),
            None => Url::parse(&cleaned),
        };
        let Ok(resolved) = resolved else { continue };

        let scheme = resolved.scheme();
        if !config
            .allowed_protocols
            .iter()
            .any(|re| re.is_match(scheme))
        {
            continue;
        }

        let absolute = resolved.to_string();
        if seen.insert(absolute.clone()) {
            out.push(absolute);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::urlproc::process_url;

    fn referrer() -> QueueItem {
        process_url("http://example.com/dir/page", None, &CrawlConfig::default()).unwrap()
    }

    fn discover_and_expand(document: &str, config: &CrawlConfig) -> Vec<String> {
        clean_and_expand(discover_resources(document, config), &referrer(), config)
    }

    #[test]
    fn finds_href_and_src_attributes() {
        let config = CrawlConfig::default();
        let urls = discover_and_expand(
            r#"<a href="stage2">x</a> <img src='/pic.png'> <a href=bare.html>"#,
            &config,
        );
        assert!(urls.contains(&"http://example.com/dir/stage2".to_string()));
        assert!(urls.contains(&"http://example.com/pic.png".to_string()));
        assert!(urls.contains(&"http://example.com/dir/bare.html".to_string()));
    }

    #[test]
    fn finds_css_urls_and_absolute_urls() {
        let config = CrawlConfig::default();
        let urls = discover_and_expand(
            r#"<style>body { background: url("/bg.png"); }</style>
               Plain text http://other.example/x here"#,
            &config,
        );
        assert!(urls.contains(&"http://example.com/bg.png".to_string()));
        assert!(urls.contains(&"http://other.example/x".to_string()));
    }

    #[test]
    fn srcset_takes_first_url_of_each_candidate() {
        let config = CrawlConfig::default();
        let urls = discover_and_expand(
            r#"<img srcset="small.jpg 480w, large.jpg 1080w">"#,
            &config,
        );
        assert!(urls.contains(&"http://example.com/dir/small.jpg".to_string()));
        assert!(urls.contains(&"http://example.com/dir/large.jpg".to_string()));
    }

    #[test]
    fn meta_refresh_in_either_attribute_order() {
        let config = CrawlConfig::default();
        let urls = discover_and_expand(
            r#"<meta http-equiv="refresh" content="0;url=/next">"#,
            &config,
        );
        assert!(urls.contains(&"http://example.com/next".to_string()));

        let urls = discover_and_expand(
            r#"<meta content="0;url=/other" http-equiv="refresh">"#,
            &config,
        );
        assert!(urls.contains(&"http://example.com/other".to_string()));
    }

    #[test]
    fn nofollow_suppresses_discovery() {
        let config = CrawlConfig::default();
        let document =
            r#"<meta name="robots" content="nofollow"><a href="hidden.html">x</a>"#;
        assert!(discover_resources(document, &config).is_empty());

        let permissive = CrawlConfig {
            respect_robots_txt: false,
            ..Default::default()
        };
        assert!(!discover_resources(document, &permissive).is_empty());
    }

    #[test]
    fn comments_and_scripts_can_be_stripped() {
        let config = CrawlConfig {
            parse_html_comments: false,
            parse_script_tags: false,
            ..Default::default()
        };
        let urls = discover_and_expand(
            r#"<!-- <a href="commented.html">x</a> -->
               <script>var u = "http://example.com/scripted";</script>
               <a href="visible.html">x</a>"#,
            &config,
        );
        assert_eq!(urls, vec!["http://example.com/dir/visible.html".to_string()]);
    }

    #[test]
    fn cleaning_strips_fluff_and_decodes_entities() {
        assert_eq!(clean_candidate(r#" href="/a?x=1&amp;y=2""#), "/a?x=1&y=2");
        assert_eq!(clean_candidate("url('/bg.png')"), "/bg.png");
        assert_eq!(clean_candidate(r#"javascript:open("/popup")"#), "/popup");
        assert_eq!(clean_candidate("/page#frag"), "/page");
        assert_eq!(clean_candidate("a&#x2f;b&#47;c"), "a/b/c");
    }

    #[test]
    fn protocol_relative_uses_referrer_protocol() {
        let config = CrawlConfig::default();
        let urls = clean_and_expand(
            vec!["//cdn.example/app.js".to_string()],
            &referrer(),
            &config,
        );
        assert_eq!(urls, vec!["http://cdn.example/app.js".to_string()]);
    }

    #[test]
    fn disallowed_protocols_are_rejected() {
        let config = CrawlConfig::default();
        let urls = clean_and_expand(
            vec![
                "mailto:someone@example.com".to_string(),
                "ftp://example.com/file".to_string(),
                "/kept".to_string(),
            ],
            &referrer(),
            &config,
        );
        assert_eq!(urls, vec!["http://example.com/kept".to_string()]);
    }

    #[test]
    fn duplicates_collapse_preserving_order() {
        let config = CrawlConfig::default();
        let urls = clean_and_expand(
            vec![
                "/a".to_string(),
                "\"/a\"".to_string(),
                "/b".to_string(),
            ],
            &referrer(),
            &config,
        );
        assert_eq!(
            urls,
            vec![
                "http://example.com/a".to_string(),
                "http://example.com/b".to_string()
            ]
        );
    }
}
