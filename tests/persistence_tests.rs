//! Freeze/defrost scenarios: snapshotting a crawl and resuming it on a
//! fresh queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{run_to_complete, start_server, Response};
use scuttle::{CrawlerBuilder, FetchQueue, ItemFilter, MemoryQueue};

const COMPLETE_WITHIN: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn frozen_queue_round_trips_ids_and_completion_state() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| {
        match path {
            "/" => Response::html(r#"<a href="/leaf">leaf</a>"#),
            "/leaf" => Response::html("end"),
            _ => Response::not_found(),
        }
    })
    .await;

    let crawler = CrawlerBuilder::new(server.url("/"))
        .interval(Duration::from_millis(10))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    run_to_complete(&crawler, COMPLETE_WITHIN).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crawl.json");
    let queue = crawler.queue();
    queue.freeze(&path).await.unwrap();

    let restored = MemoryQueue::new();
    restored.defrost(&path).await.unwrap();

    let total = queue.len().await.unwrap();
    assert_eq!(restored.len().await.unwrap(), total);
    assert_eq!(
        restored.count_completed().await.unwrap(),
        queue.count_completed().await.unwrap()
    );
    for index in 0..total {
        let item = restored.get(index).await.unwrap();
        assert_eq!(item.id, index);
        assert!(restored.exists(&item.url).await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn a_defrosted_queue_resumes_pending_work() {
    let server = start_server(|path: &str, _: &std::collections::HashMap<String, String>| {
        match path {
            "/" => Response::html("seed page, no links"),
            "/pending" => Response::html("was queued before the freeze"),
            _ => Response::not_found(),
        }
    })
    .await;

    // Queue work without ever starting the first crawler.
    let first = CrawlerBuilder::new(server.url("/"))
        .respect_robots_txt(false)
        .build()
        .unwrap();
    first.queue_url(&server.url("/"), None, false).await;
    first.queue_url(&server.url("/pending"), None, false).await;
    assert_eq!(first.queue().len().await.unwrap(), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crawl.json");
    first.queue().freeze(&path).await.unwrap();

    // A second crawler picks the snapshot up and finishes the work.
    let restored = Arc::new(MemoryQueue::new());
    restored.defrost(&path).await.unwrap();
    let second = CrawlerBuilder::new(server.url("/"))
        .interval(Duration::from_millis(10))
        .respect_robots_txt(false)
        .queue(restored)
        .build()
        .unwrap();
    run_to_complete(&second, COMPLETE_WITHIN).await;

    let queue = second.queue();
    assert_eq!(queue.len().await.unwrap(), 2);
    assert_eq!(queue.count_completed().await.unwrap(), 2);
    assert_eq!(server.hits_for("/pending").len(), 1);
    assert_eq!(
        queue
            .count_items(&ItemFilter::completed())
            .await
            .unwrap(),
        2
    );
}
