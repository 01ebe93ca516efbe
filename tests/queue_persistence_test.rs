//! Frontier persistence: queue events as the source of truth for resume

use std::time::{Duration, Instant};

use newswire_crawler::pacer::{HostPacer, PacerConfig};
use newswire_crawler::queue::{FrontierQueue, PendingRequest, RequestSource};
use newswire_crawler::storage::{QueueAction, Storage};
use newswire_crawler::urlstore::{CanonicalPolicy, UrlStore};
use tempfile::TempDir;

fn open_pacer() -> HostPacer {
    HostPacer::new(PacerConfig {
        min_interval: Duration::ZERO,
        backoff_ceiling: Duration::from_secs(1),
        max_in_flight: 16,
    })
}

async fn fixture() -> (Storage, UrlStore, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path()).await.expect("open storage");
    let urlstore = UrlStore::new(storage.pool().clone(), CanonicalPolicy::default());
    (storage, urlstore, dir)
}

#[tokio::test]
async fn rehydrate_restores_only_unsettled_urls() {
    let (storage, urlstore, _dir) = fixture().await;
    let seed = urlstore.intern("https://h.example/").await.expect("intern");
    let visited = urlstore.intern("https://h.example/a").await.expect("intern");
    let pending = urlstore.intern("https://h.example/b").await.expect("intern");

    let job_id = storage
        .create_job(seed, &serde_json::json!({}))
        .await
        .expect("job");

    // a was fetched and saved; b was discovered and enqueued but never settled.
    for (action, url_id, depth) in [
        (QueueAction::Enqueued, seed, 0),
        (QueueAction::Saved, seed, 0),
        (QueueAction::Discovered, visited, 1),
        (QueueAction::Enqueued, visited, 1),
        (QueueAction::Visited, visited, 1),
        (QueueAction::Discovered, pending, 1),
        (QueueAction::Enqueued, pending, 1),
    ] {
        storage
            .log_queue_event(job_id, action, url_id, depth)
            .await
            .expect("log event");
    }

    let queue = FrontierQueue::rehydrate(job_id, &storage).await.expect("rehydrate");
    assert_eq!(queue.len(), 1);

    let pacer = open_pacer();
    let req = queue.dequeue_ready(Instant::now(), &pacer).expect("entry");
    assert_eq!(req.url_id, pending);
    assert_eq!(req.depth, 1);
    assert_eq!(req.host, "h.example");

    // Settled URLs are remembered: re-enqueueing them at the same depth fails.
    assert!(!queue.enqueue(PendingRequest {
        url_id: visited,
        host: "h.example".to_string(),
        priority: 10.0,
        depth: 1,
        source: RequestSource::Discovery,
        job_id,
        expected_value: None,
    }));
}

#[tokio::test]
async fn rehydrate_tolerates_duplicate_events() {
    let (storage, urlstore, _dir) = fixture().await;
    let seed = urlstore.intern("https://h.example/").await.expect("intern");
    let job_id = storage
        .create_job(seed, &serde_json::json!({}))
        .await
        .expect("job");

    // Idempotent replay: the same discovered/enqueued pair logged twice.
    for _ in 0..2 {
        storage
            .log_queue_event(job_id, QueueAction::Discovered, seed, 0)
            .await
            .expect("log");
        storage
            .log_queue_event(job_id, QueueAction::Enqueued, seed, 0)
            .await
            .expect("log");
    }

    let queue = FrontierQueue::rehydrate(job_id, &storage).await.expect("rehydrate");
    assert_eq!(queue.len(), 1, "duplicates must collapse to one entry");
}

#[tokio::test]
async fn reload_replaces_in_memory_state() {
    let (storage, urlstore, _dir) = fixture().await;
    let seed = urlstore.intern("https://h.example/").await.expect("intern");
    let stale = urlstore.intern("https://h.example/stale").await.expect("intern");
    let job_id = storage
        .create_job(seed, &serde_json::json!({}))
        .await
        .expect("job");

    let queue = FrontierQueue::new(job_id);
    queue.enqueue(PendingRequest {
        url_id: stale,
        host: "h.example".to_string(),
        priority: 10.0,
        depth: 0,
        source: RequestSource::Discovery,
        job_id,
        expected_value: None,
    });

    storage
        .log_queue_event(job_id, QueueAction::Enqueued, seed, 0)
        .await
        .expect("log");
    queue.reload(&storage).await.expect("reload");

    // Only the persisted entry survives the reload.
    assert_eq!(queue.len(), 1);
    let pacer = open_pacer();
    let req = queue.dequeue_ready(Instant::now(), &pacer).expect("entry");
    assert_eq!(req.url_id, seed);
}
