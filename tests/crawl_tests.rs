//! End-to-end crawl scenarios against the in-process HTTP fixture.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{count_matching, run_to_complete, start_server, Response};
use scuttle::{CrawlEvent, CrawlerBuilder, FetchQueue, ItemFilter, MemoryCache, Status};

const COMPLETE_WITHIN: Duration = Duration::from_secs(30);

fn fast(builder: CrawlerBuilder) -> CrawlerBuilder {
    builder
        .interval(Duration::from_millis(10))
        .timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread")]
async fn basic_crawl_walks_links_redirects_and_nofollow() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html("Home. <a href='stage2'>stage2</a>"),
        "/stage2" => Response::html(r#"<a href="stage/3">three</a>"#),
        "/stage/3" => Response::html(r#"<a href="/stage/4">four</a>"#),
        "/stage/4" => Response::html(r#"<a href="../stage5">five</a>"#),
        "/stage5" => Response::redirect(301, "/stage6"),
        "/stage6" => Response::html(
            r#"<meta name="robots" content="nofollow"><a href="/hidden">x</a>"#,
        ),
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/"))).build().unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    // One redirect, one discovery per downloaded page, and a terminal
    // Complete. The nofollow page discovers nothing.
    assert_eq!(
        count_matching(&events, |e| matches!(e, CrawlEvent::FetchRedirect { .. })),
        1
    );
    assert_eq!(
        count_matching(&events, |e| matches!(e, CrawlEvent::DiscoveryComplete { .. })),
        5
    );
    let nofollow_urls = events.iter().find_map(|event| match event {
        CrawlEvent::DiscoveryComplete { item, urls } if item.path == "/stage6" => {
            Some(urls.clone())
        }
        _ => None,
    });
    assert_eq!(nofollow_urls, Some(Vec::new()));

    // Exactly one queue item per distinct URL.
    let queue = crawler.queue();
    assert_eq!(queue.len().await.unwrap(), 6);
    assert_eq!(queue.count_completed().await.unwrap(), 6);
    assert!(server.hits_for("/hidden").is_empty());

    let redirected = queue
        .filter_items(&ItemFilter {
            status: Some(Status::Redirected),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(redirected.len(), 1);
    assert_eq!(redirected[0].path, "/stage5");
}

#[tokio::test(flavor = "multi_thread")]
async fn robots_rules_gate_admission() {
    let handler = |path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/robots.txt" => Response {
            code: 200,
            headers: vec![("Content-Type".into(), "text/plain".into())],
            body: b"User-agent: *\nDisallow: /forbidden\n".to_vec(),
        },
        "/" => Response::html(r#"<a href="/forbidden">f</a> <a href="/allowed">a</a>"#),
        "/allowed" => Response::html("fine"),
        "/forbidden" => Response::html("secret"),
        _ => Response::not_found(),
    };

    let server = start_server(handler).await;
    let crawler = fast(CrawlerBuilder::new(server.url("/"))).build().unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    assert!(events.iter().any(|event| matches!(
        event,
        CrawlEvent::FetchDisallowed { item } if item.path == "/forbidden"
    )));
    assert_eq!(
        count_matching(&events, |e| matches!(
            e,
            CrawlEvent::FetchComplete { item, .. } if item.path == "/forbidden"
        )),
        0
    );
    assert!(server.hits_for("/forbidden").is_empty());
    assert_eq!(server.hits_for("/allowed").len(), 1);

    // With robots disabled the same page is fetched.
    let server = start_server(handler).await;
    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    assert_eq!(
        count_matching(&events, |e| matches!(
            e,
            CrawlEvent::FetchComplete { item, .. } if item.path == "/forbidden"
        )),
        1
    );
    assert!(server.hits_for("/robots.txt").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cookies_persist_across_requests() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html(r#"<a href="/page2">next</a>"#)
            .header("Set-Cookie", "thing=stuff; path=/"),
        "/page2" => Response::html("done"),
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    run_to_complete(&crawler, COMPLETE_WITHIN).await;

    let hits = server.hits_for("/page2");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1.get("cookie").map(String::as_str), Some("thing=stuff"));

    let jar = crawler.cookies();
    assert_eq!(jar.get(Some("thing"), None).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn max_depth_bounds_the_crawl() {
    // An 11-node graph: 1 seed, 2 pages at depth 2, 3 at depth 3, and 5
    // leaves at depth 4.
    let handler = |path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html(r#"<a href="/depth/1a">1a</a> <a href="/depth/1b">1b</a>"#),
        "/depth/1a" => {
            Response::html(r#"<a href="/depth/2a">2a</a> <a href="/depth/2b">2b</a>"#)
        }
        "/depth/1b" => Response::html(r#"<a href="/depth/2c">2c</a>"#),
        "/depth/2a" => {
            Response::html(r#"<a href="/depth/3a">3a</a> <a href="/depth/3b">3b</a>"#)
        }
        "/depth/2b" => {
            Response::html(r#"<a href="/depth/3c">3c</a> <a href="/depth/3d">3d</a>"#)
        }
        "/depth/2c" => Response::html(r#"<a href="/depth/3e">3e</a>"#),
        _ => Response::html("leaf"),
    };

    for (max_depth, expected_fetched) in [(0usize, 11usize), (1, 1), (2, 3), (3, 6)] {
        let server = start_server(handler).await;
        let crawler = fast(CrawlerBuilder::new(server.url("/")))
            .respect_robots_txt(false)
            .max_depth(max_depth)
            .build()
            .unwrap();
        run_to_complete(&crawler, COMPLETE_WITHIN).await;

        let fetched = crawler
            .queue()
            .count_items(&ItemFilter {
                fetched: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            fetched, expected_fetched,
            "max_depth {} fetched {} items",
            max_depth, fetched
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn conditional_fetch_hits_304_via_cache() {
    let handler = |path: &str, headers: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html(r#"<a href="/etag">cached</a>"#),
        "/etag" => {
            if headers.get("if-none-match").map(String::as_str) == Some("\"X\"") {
                Response::status(304)
            } else {
                Response::html("cacheable body").header("ETag", "\"X\"")
            }
        }
        _ => Response::not_found(),
    };

    let cache = Arc::new(MemoryCache::default());

    let server = start_server(handler).await;
    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .cache(cache.clone())
        .build()
        .unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;
    assert_eq!(
        count_matching(&events, |e| matches!(e, CrawlEvent::NotModified { .. })),
        0
    );

    // A second crawl with the same cache sends the validator and observes
    // the 304.
    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .cache(cache)
        .build()
        .unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    let not_modified: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            CrawlEvent::NotModified { item, cache_object, .. } => {
                Some((item.path.clone(), cache_object.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(not_modified.len(), 1);
    assert_eq!(not_modified[0].0, "/etag");
    let stored = not_modified[0].1.as_ref().expect("cache object");
    assert_eq!(stored.etag.as_deref(), Some("\"X\""));

    let etag_hits = server.hits_for("/etag");
    assert_eq!(etag_hits.len(), 2);
    assert_eq!(
        etag_hits[1].1.get("if-none-match").map(String::as_str),
        Some("\"X\"")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_responses_terminate_with_data_error() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html(r#"<a href="/big">big</a>"#),
        "/big" => Response {
            code: 200,
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: vec![b'x'; 64 * 1024],
        },
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .max_resource_size(16 * 1024)
        .build()
        .unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    let failed = events
        .iter()
        .find_map(|event| match event {
            CrawlEvent::FetchDataError { item, .. } => Some(item.clone()),
            _ => None,
        })
        .expect("a FetchDataError for /big");
    assert_eq!(failed.path, "/big");
    assert!(failed.fetched);
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(
        count_matching(&events, |e| matches!(
            e,
            CrawlEvent::FetchComplete { item, .. } if item.path == "/big"
        )),
        0
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_holds_block_completion_until_released() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html("no links here"),
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .listener_ttl(Duration::from_secs(60))
        .build()
        .unwrap();

    let hold = crawler.wait();
    let mut rx = crawler.subscribe();
    crawler.start();

    // The page downloads, but the hold keeps the crawl alive.
    let mut saw_complete_early = false;
    let early_window = tokio::time::sleep(Duration::from_millis(500));
    tokio::pin!(early_window);
    loop {
        tokio::select! {
            _ = &mut early_window => break,
            event = rx.recv() => {
                if matches!(event, Ok(CrawlEvent::Complete)) {
                    saw_complete_early = true;
                    break;
                }
            }
        }
    }
    assert!(!saw_complete_early, "Complete fired while a hold was open");

    hold.release();
    let complete = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if matches!(rx.recv().await, Ok(CrawlEvent::Complete)) {
                break;
            }
        }
    })
    .await;
    assert!(complete.is_ok(), "Complete did not fire after release");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_discoveries_yield_one_item() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html(r#"<a href="/page">one</a> <a href="/page">two</a>"#),
        "/page" => Response::html(r#"<a href="/">home</a>"#),
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    let events = run_to_complete(&crawler, COMPLETE_WITHIN).await;

    assert_eq!(crawler.queue().len().await.unwrap(), 2);
    // The back-link to the seed is a duplicate too.
    assert!(
        count_matching(&events, |e| matches!(e, CrawlEvent::QueueDuplicate { .. })) >= 1
    );
    assert_eq!(server.hits_for("/page").len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_with_abort_clears_open_requests() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| match path {
        "/" => Response::html("tiny"),
        _ => Response::not_found(),
    })
    .await;

    let crawler = fast(CrawlerBuilder::new(server.url("/")))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    crawler.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    crawler.stop(true);
    assert!(!crawler.is_running());

    // Restarting resumes the same queue and re-announces the crawl.
    let mut rx = crawler.subscribe();
    crawler.start();
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("an event after restart")
        .unwrap();
    assert!(matches!(first, CrawlEvent::CrawlStart | CrawlEvent::Complete));
    crawler.stop(false);
}
