//! # URL Processor Module
//!
//! Canonicalises a raw URL string into a queue-item shape.
//!
//! Processing: trim, resolve against the referrer, normalise scheme/host
//! case and percent-encoding (via the `url` crate), drop the fragment, then
//! apply the configured rewrites (`www.` strip, query strip, query-parameter
//! sort, ISO-8859-1 re-encoding) before splitting into components. The seed
//! has no referrer and therefore lands at depth 1; discovered URLs inherit
//! their referrer's depth plus one.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::config::{CrawlConfig, UrlEncoding};
use crate::item::{QueueItem, StateData, Status};

/// Characters percent-encoded when rebuilding a path segment.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'%')
    .add(b'#')
    .add(b'?');

/// Canonicalises `raw` into a `Created` queue item, or `None` when the input
/// is empty after trimming or cannot be parsed.
pub fn process_url(
    raw: &str,
    referrer: Option<&QueueItem>,
    config: &CrawlConfig,
) -> Option<QueueItem> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut resolved = match referrer {
        Some(parent) => Url::parse(&parent.url).ok()?.join(trimmed).ok()?,
        None => Url::parse(trimmed).ok()?,
    };
    resolved.set_fragment(None);

    if config.strip_www_domain {
        if let Some(host) = resolved.host_str() {
            if let Some(stripped) = host.strip_prefix("www.") {
                let stripped = stripped.to_string();
                resolved.set_host(Some(&stripped)).ok()?;
            }
        }
    }

    if config.strip_querystring {
        resolved.set_query(None);
    } else if config.sort_query_parameters {
        sort_query(&mut resolved);
    }

    if config.url_encoding == UrlEncoding::Iso8859 {
        reencode_iso8859(&mut resolved);
    }

    let host = resolved.host_str()?.to_string();
    let protocol = resolved.scheme().to_string();
    let port = resolved.port_or_known_default().unwrap_or(0);
    let uri_path = resolved.path().to_string();
    let path = match resolved.query() {
        Some(query) => format!("{}?{}", uri_path, query),
        None => uri_path.clone(),
    };

    Some(QueueItem {
        id: 0,
        url: resolved.to_string(),
        protocol,
        host,
        port,
        path,
        uri_path,
        depth: referrer.map_or(0, |parent| parent.depth) + 1,
        referrer: referrer.map(|parent| parent.url.clone()),
        fetched: false,
        status: Status::Created,
        state_data: StateData::default(),
    })
}

/// Rewrites the query string with parameters in alphabetical order so URLs
/// differing only in parameter order collapse to one queue entry.
fn sort_query(url: &mut Url) {
    if url.query().is_none() {
        return;
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    pairs.sort();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(&k, &v);
    }
    let sorted = serializer.finish();
    url.set_query(Some(&sorted));
}

/// Re-encodes the path with single-byte percent escapes for characters that
/// fit ISO-8859-1, leaving anything wider in its UTF-8 form.
fn reencode_iso8859(url: &mut Url) {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
    let mut encoded = String::with_capacity(decoded.len());
    for ch in decoded.chars() {
        let code = ch as u32;
        if code < 0x80 {
            encoded.extend(utf8_percent_encode(
                ch.encode_utf8(&mut [0u8; 4]),
                PATH_ENCODE,
            ));
        } else if code <= 0xFF {
            encoded.push_str(&format!("%{:02X}", code));
        } else {
            encoded.extend(utf8_percent_encode(
                ch.encode_utf8(&mut [0u8; 4]),
                PATH_ENCODE,
            ));
        }
    }
    url.set_path(&encoded);
}
