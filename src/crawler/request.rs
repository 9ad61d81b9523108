//! The per-item request state machine.
//!
//! One call to `run_request` drives a spooled queue item to exactly one
//! terminal status: `Downloaded`, `Redirected`, `NotFound`, `Failed`,
//! `Timeout`, or `DownloadPrevented`. The terminal status is written to the
//! queue before the matching event fires, and the open-requests list shrinks
//! by exactly one when the task finishes (or is aborted by `stop(true)`, in
//! which case it dies silently).

use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::events::{CrawlEvent, ResponseHead};
use crate::item::{QueueItem, QueueItemUpdate, StateDataUpdate, Status};

use super::core::Engine;

lazy_static! {
    static ref META_CHARSET: Regex =
        Regex::new(r#"(?i)<meta[^>]*charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#).unwrap();
}

/// Issues a GET without redirect following, with the engine's user agent,
/// cookies, and proxy/TLS settings. Used for robots.txt.
pub(crate) async fn plain_get(
    engine: &Arc<Engine>,
    url: &str,
) -> Result<reqwest::Response, crate::error::CrawlError> {
    let mut request = engine.client.get(url);
    if engine.config.accept_cookies {
        if let Ok(parsed) = url::Url::parse(url) {
            let pairs = engine
                .cookies
                .get_as_header(parsed.host_str(), Some(parsed.path()));
            if !pairs.is_empty() {
                request = request.header(reqwest::header::COOKIE, pairs.join("; "));
            }
        }
    }
    let response = tokio::time::timeout(engine.config.timeout, request.send())
        .await
        .map_err(|_| {
            crate::error::CrawlError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("robots.txt fetch timed out: {}", url),
            ))
        })??;
    Ok(response)
}

/// Drives one spooled item to its terminal status.
pub(crate) async fn run_request(engine: &Arc<Engine>, item: QueueItem) {
    let was_first = !engine.first_request_issued.swap(true, Ordering::SeqCst);
    let time_commenced = Instant::now();

    let request = build_request(engine, &item).await;
    engine.events.emit(CrawlEvent::FetchStart { item: item.clone() });

    let response = match tokio::time::timeout(engine.config.timeout, request.send()).await {
        Err(_) => {
            let timeout_ms = engine.config.timeout.as_millis() as u64;
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::Timeout))
                .await
            {
                engine.events.emit(CrawlEvent::FetchTimeout {
                    item: updated,
                    timeout_ms,
                });
            }
            return;
        }
        Ok(Err(error)) => {
            client_error(engine, &item, error.to_string()).await;
            return;
        }
        Ok(Ok(response)) => response,
    };

    let request_latency = time_commenced.elapsed().as_millis() as u64;
    let head = response_head(&response);
    let set_cookies = set_cookie_values(&response);

    let item = match engine
        .queue
        .update(
            item.id,
            QueueItemUpdate {
                state_data: Some(StateDataUpdate {
                    request_latency: Some(request_latency),
                    request_time: Some(request_latency),
                    content_length: head.content_length,
                    content_type: head.content_type.clone(),
                    code: Some(head.code),
                    headers: Some(head.headers.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
    {
        Ok(updated) => updated,
        Err(error) => {
            warn!(%error, id = item.id, "header update failed");
            item
        }
    };

    if engine.config.accept_cookies {
        for header in set_cookies {
            if let Err(error) = engine.cookies.add_from_string(&header) {
                engine.events.emit(CrawlEvent::CookieError {
                    item: item.clone(),
                    error: error.to_string(),
                    header,
                });
            }
        }
    }

    engine.events.emit(CrawlEvent::FetchHeaders {
        item: item.clone(),
        response: head.clone(),
    });

    // Declared size over the cap: refuse before reading a single chunk.
    if head
        .content_length
        .is_some_and(|len| len > engine.config.max_resource_size)
    {
        drop(response);
        if let Ok(updated) = engine
            .queue
            .update(item.id, QueueItemUpdate::terminal(Status::Failed))
            .await
        {
            engine.events.emit(CrawlEvent::FetchDataError {
                item: updated,
                response: head,
            });
        }
        return;
    }

    match head.code {
        200..=299 => {
            download_body(engine, item, response, head, time_commenced).await;
        }
        304 => {
            let cache_object = match &engine.cache {
                Some(cache) => cache.get_cache_data(&item).await,
                None => None,
            };
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::Downloaded))
                .await
            {
                engine.events.emit(CrawlEvent::NotModified {
                    item: updated,
                    response: head,
                    cache_object,
                });
            }
        }
        300..=399 => {
            handle_redirect(engine, item, head, was_first).await;
        }
        404 | 410 => {
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::NotFound))
                .await
            {
                let event = if head.code == 404 {
                    CrawlEvent::Fetch404 {
                        item: updated,
                        response: head,
                    }
                } else {
                    CrawlEvent::Fetch410 {
                        item: updated,
                        response: head,
                    }
                };
                engine.events.emit(event);
            }
        }
        _ => {
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::Failed))
                .await
            {
                engine.events.emit(CrawlEvent::FetchError {
                    item: updated,
                    response: head,
                });
            }
        }
    }
}

async fn build_request(engine: &Arc<Engine>, item: &QueueItem) -> reqwest::RequestBuilder {
    let mut request = engine.client.get(&item.url);

    if engine.config.decompress_responses {
        request = request.header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate");
    }

    if engine.config.accept_cookies {
        let pairs = engine
            .cookies
            .get_as_header(Some(&item.host), Some(&item.path));
        if !pairs.is_empty() {
            request = request.header(reqwest::header::COOKIE, pairs.join("; "));
        }
    }

    if engine.config.needs_auth {
        if let Some(user) = &engine.config.auth_user {
            request = request.basic_auth(user, engine.config.auth_pass.as_deref());
        }
    }

    if let Some(cache) = &engine.cache {
        if let Some(stored) = cache.get_cache_data(item).await {
            if let Some(etag) = stored.etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = stored.last_modified {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
            }
        }
    }

    for (name, value) in &engine.config.custom_headers {
        request = request.header(name.as_str(), value.as_str());
    }

    request
}

async fn client_error(engine: &Arc<Engine>, item: &QueueItem, error: String) {
    let updated = engine
        .queue
        .update(
            item.id,
            QueueItemUpdate {
                fetched: Some(true),
                status: Some(Status::Failed),
                state_data: Some(StateDataUpdate {
                    code: Some(600),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await;
    if let Ok(updated) = updated {
        engine
            .events
            .emit(CrawlEvent::FetchClientError { item: updated, error });
    }
}

async fn handle_redirect(
    engine: &Arc<Engine>,
    item: QueueItem,
    head: ResponseHead,
    was_first: bool,
) {
    let item = match engine
        .queue
        .update(item.id, QueueItemUpdate::terminal(Status::Redirected))
        .await
    {
        Ok(updated) => updated,
        Err(_) => item,
    };

    let location = head.headers.get("location").cloned();
    let mut target = location
        .as_deref()
        .and_then(|location| crate::urlproc::process_url(location, Some(&item), &engine.config));

    if let Some(target_item) = target.as_mut() {
        if was_first && engine.config.allow_initial_domain_change {
            // The initial chain adopts the redirect's host and must not
            // inflate depth.
            debug!(host = %target_item.host, "adopting redirect host as canonical");
            *engine.host.write() = target_item.host.clone();
            target_item.depth = 1;
        }
    }

    engine.events.emit(CrawlEvent::FetchRedirect {
        item: item.clone(),
        target: target.clone(),
        response: head,
    });

    if let Some(target_item) = target {
        let _ = engine.admit_item(target_item, Some(&item), false).await;
    }
}

async fn download_body(
    engine: &Arc<Engine>,
    item: QueueItem,
    mut response: reqwest::Response,
    head: ResponseHead,
    time_commenced: Instant,
) {
    match engine.download_conditions.evaluate(&item, None).await {
        Ok(true) => {}
        Ok(false) => {
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::DownloadPrevented))
                .await
            {
                engine.events.emit(CrawlEvent::DownloadPrevented {
                    item: updated,
                    response: head,
                });
            }
            return;
        }
        Err(error) => {
            if let Ok(updated) = engine
                .queue
                .update(item.id, QueueItemUpdate::terminal(Status::DownloadPrevented))
                .await
            {
                engine.events.emit(CrawlEvent::DownloadConditionError {
                    item: updated,
                    error: error.to_string(),
                });
            }
            return;
        }
    }

    let supported_mime = head
        .content_type
        .as_deref()
        .map(|ct| engine.config.is_supported_mime(ct))
        .unwrap_or(false);

    if !supported_mime && !engine.config.download_unsupported {
        if let Ok(updated) = engine
            .queue
            .update(item.id, QueueItemUpdate::terminal(Status::DownloadPrevented))
            .await
        {
            engine.events.emit(CrawlEvent::DownloadPrevented {
                item: updated,
                response: head,
            });
        }
        return;
    }

    let item = match engine
        .queue
        .update(
            item.id,
            QueueItemUpdate {
                status: Some(Status::Headers),
                ..Default::default()
            },
        )
        .await
    {
        Ok(updated) => updated,
        Err(_) => item,
    };

    let headers_received = Instant::now();
    let declared = head.content_length;
    let max = engine.config.max_resource_size;
    let mut buffer: Vec<u8> =
        Vec::with_capacity(declared.unwrap_or(64 * 1024).min(max) as usize);

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if (buffer.len() + chunk.len()) as u64 > max {
                    drop(response);
                    if let Ok(updated) = engine
                        .queue
                        .update(item.id, QueueItemUpdate::terminal(Status::Failed))
                        .await
                    {
                        engine.events.emit(CrawlEvent::FetchDataError {
                            item: updated,
                            response: head,
                        });
                    }
                    return;
                }
                buffer.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(error) => {
                client_error(engine, &item, error.to_string()).await;
                return;
            }
        }
    }

    let actual = buffer.len() as u64;
    let download_time = headers_received.elapsed().as_millis() as u64;
    let request_time = time_commenced.elapsed().as_millis() as u64;

    let item = match engine
        .queue
        .update(
            item.id,
            QueueItemUpdate {
                fetched: Some(true),
                status: Some(Status::Downloaded),
                state_data: Some(StateDataUpdate {
                    download_time: Some(download_time),
                    request_time: Some(request_time),
                    actual_data_size: Some(actual),
                    sent_incorrect_size: Some(declared.is_some_and(|d| d != actual)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
    {
        Ok(updated) => updated,
        Err(error) => {
            warn!(%error, id = item.id, "terminal update failed");
            item
        }
    };

    if let Some(cache) = &engine.cache {
        cache.set_cache_data(&item, &head, &buffer).await;
    }

    // The extractor always sees decompressed bytes, whatever gets delivered.
    let content_encoding = head.headers.get("content-encoding").cloned();
    let (decompressed, gzip_error) = match content_encoding.as_deref() {
        Some(encoding) if !encoding.eq_ignore_ascii_case("identity") => {
            match decompress(encoding, &buffer) {
                Ok(bytes) => (bytes, None),
                Err(error) => (buffer.clone(), Some(error.to_string())),
            }
        }
        _ => (buffer.clone(), None),
    };
    if let Some(error) = gzip_error {
        engine.events.emit(CrawlEvent::GzipError {
            item: item.clone(),
            error,
        });
    }

    let mut delivered = if engine.config.decompress_responses {
        decompressed.clone()
    } else {
        buffer
    };
    if engine.config.decode_responses {
        delivered = decode_charset(&delivered, head.content_type.as_deref()).into_bytes();
    }

    engine.events.emit(CrawlEvent::FetchComplete {
        item: item.clone(),
        body: Bytes::from(delivered),
        response: head,
    });

    if supported_mime {
        let document = decode_charset(&decompressed, item.state_data.content_type.as_deref());
        let candidates = crate::discover::discover_resources(&document, &engine.config);
        let urls = crate::discover::clean_and_expand(candidates, &item, &engine.config);
        trace!(id = item.id, discovered = urls.len(), "discovery finished");
        for url in &urls {
            let _ = engine.admit(url, Some(&item), false).await;
        }
        engine
            .events
            .emit(CrawlEvent::DiscoveryComplete { item, urls });
    }
}

fn response_head(response: &reqwest::Response) -> ResponseHead {
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<u64>().ok());
    let content_type = headers.get("content-type").cloned();

    ResponseHead {
        code: response.status().as_u16(),
        content_length,
        content_type,
        headers,
    }
}

fn set_cookie_values(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Inflates a gzip or deflate body.
fn decompress(encoding: &str, data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    match encoding.to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => {
            MultiGzDecoder::new(data).read_to_end(&mut out)?;
        }
        "deflate" => {
            // Servers send both zlib-wrapped and raw deflate under this name.
            if ZlibDecoder::new(data).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported content encoding: {}", other),
            ));
        }
    }
    Ok(out)
}

/// Decodes bytes using the charset from the Content-Type header, a
/// `<meta charset>` within the first 512 bytes, or UTF-8.
fn decode_charset(bytes: &[u8], content_type: Option<&str>) -> String {
    let label = content_type
        .and_then(|ct| {
            ct.split(';')
                .map(str::trim)
                .find_map(|part| part.strip_prefix("charset="))
                .map(|cs| cs.trim_matches('"').to_string())
        })
        .or_else(|| {
            let head = &bytes[..bytes.len().min(512)];
            META_CHARSET
                .captures(&String::from_utf8_lossy(head))
                .map(|c| c[1].to_string())
        });

    let encoding = label
        .as_deref()
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);

    let (decoded, _, _) = encoding.decode(bytes);
    decoded.into_owned()
}
