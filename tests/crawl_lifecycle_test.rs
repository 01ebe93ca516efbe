//! Crawl job lifecycle: completion, budget, pause/resume, cache policies

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{seed_news_site, StubFetcher};
use newswire_crawler::config::{CrawlOptions, CrawlType, FetchPolicy};
use newswire_crawler::service::CrawlEngine;
use newswire_crawler::storage::{JobStatus, QueueAction};
use tempfile::TempDir;

async fn engine_with(fetcher: Arc<StubFetcher>) -> (CrawlEngine, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let engine = CrawlEngine::open_with_fetcher(dir.path(), fetcher)
        .await
        .expect("open engine");
    (engine, dir)
}

fn options(seed: &str) -> CrawlOptions {
    CrawlOptions::builder()
        .seed_url(seed)
        .crawl_type(CrawlType::Basic)
        .concurrency(2)
        .max_depth(1)
        .min_interval_ms(0)
        .build()
        .expect("options")
}

#[tokio::test]
async fn basic_crawl_drains_and_completes() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 6);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let job_id = engine
        .start_crawl(options("https://news.example/"))
        .await
        .expect("start");
    engine.join_crawl(job_id).await.expect("join");

    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.end_reason.as_deref(), Some("frontier-drained"));

    let saved = engine
        .storage()
        .count_queue_events(job_id, QueueAction::Saved)
        .await
        .expect("count");
    // Index plus six articles.
    assert!(saved >= 7, "expected at least 7 saved pages, got {saved}");
}

#[tokio::test]
async fn budget_ceiling_completes_gracefully() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 20);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let mut opts = options("https://news.example/");
    opts.max_pages = Some(3);
    opts.concurrency = 1;
    let job_id = engine.start_crawl(opts).await.expect("start");
    engine.join_crawl(job_id).await.expect("join");

    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.end_reason.as_deref(), Some("budget-reached"));
    let saved = engine
        .storage()
        .count_queue_events(job_id, QueueAction::Saved)
        .await
        .expect("count");
    assert!(saved <= 4, "budget of 3 produced {saved} saved pages");
}

#[tokio::test]
async fn pause_then_resume_never_revisits() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 12);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let mut opts = options("https://news.example/");
    opts.concurrency = 1;
    opts.min_interval_ms = 25;
    let job_id = engine.start_crawl(opts).await.expect("start");

    // Let a few pages land, then pause mid-crawl.
    loop {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let saved = engine
            .storage()
            .count_queue_events(job_id, QueueAction::Saved)
            .await
            .expect("count");
        if saved >= 2 {
            break;
        }
    }
    engine.pause_crawl(job_id).await.expect("pause");
    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Paused);

    engine.resume_crawl(job_id).await.expect("resume");
    engine.join_crawl(job_id).await.expect("join");

    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);

    // No URL settles twice across the pause boundary.
    let events = engine.storage().queue_events(job_id).await.expect("events");
    let mut settled = std::collections::HashMap::new();
    for event in &events {
        if event.action == QueueAction::Saved {
            *settled.entry(event.url_id).or_insert(0u32) += 1;
        }
    }
    for (url_id, count) in settled {
        assert_eq!(count, 1, "url {url_id:?} was saved {count} times");
    }

    // All 13 pages (index + 12 articles) eventually landed exactly once.
    let saved = events
        .iter()
        .filter(|e| e.action == QueueAction::Saved)
        .count();
    assert_eq!(saved, 13);
}

#[tokio::test]
async fn queue_event_and_response_parity() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 4);
    // One deny-listed page that will be skipped.
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let mut opts = options("https://news.example/");
    opts.deny_patterns = vec!["*story-about-topic-number-0*".to_string()];
    opts.recompile_patterns().expect("patterns");
    let job_id = engine.start_crawl(opts).await.expect("start");
    engine.join_crawl(job_id).await.expect("join");

    let events = engine.storage().queue_events(job_id).await.expect("events");
    for event in events {
        match event.action {
            QueueAction::Saved | QueueAction::Visited | QueueAction::Failed => {
                let response = engine
                    .storage()
                    .latest_response(event.url_id)
                    .await
                    .expect("query");
                assert!(
                    response.is_some(),
                    "settled url {:?} has no response row",
                    event.url_id
                );
            }
            QueueAction::Skipped => {
                let response = engine
                    .storage()
                    .latest_response(event.url_id)
                    .await
                    .expect("query");
                assert!(
                    response.is_none(),
                    "skipped url {:?} has a ghost response row",
                    event.url_id
                );
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn cache_only_serves_without_network() {
    let fetcher = StubFetcher::new();
    let page_url = "https://news.example/";
    seed_news_site(&fetcher, "https://news.example", 0);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    // First crawl populates cache and storage over the network.
    let mut warm = options(page_url);
    warm.max_depth = 0;
    warm.cache_policy = FetchPolicy::NetworkOnly;
    let first_job = engine.start_crawl(warm).await.expect("start");
    engine.join_crawl(first_job).await.expect("join");
    let hits_after_warm = fetcher.hits(page_url);
    assert_eq!(hits_after_warm, 1);
    let seed_id = engine
        .storage()
        .get_job(first_job)
        .await
        .expect("job")
        .url_id;
    assert_eq!(engine.storage().response_count(seed_id).await.expect("count"), 1);

    // Second crawl: cache-only with a generous freshness window.
    let mut cold = options(page_url);
    cold.max_depth = 0;
    cold.cache_policy = FetchPolicy::CacheOnly;
    cold.max_cache_age_ms = Some(7_200_000);
    let second_job = engine.start_crawl(cold).await.expect("start");
    engine.join_crawl(second_job).await.expect("join");

    // No network I/O for the page and no new response row.
    assert_eq!(fetcher.hits(page_url), hits_after_warm);
    assert_eq!(engine.storage().response_count(seed_id).await.expect("count"), 1);
    let visited = engine
        .storage()
        .count_queue_events(second_job, QueueAction::Visited)
        .await
        .expect("count");
    assert_eq!(visited, 1, "cache adoption settles as visited");
}

#[tokio::test]
async fn stop_cancels_and_preserves_queue_events() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 12);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let mut opts = options("https://news.example/");
    opts.concurrency = 1;
    opts.min_interval_ms = 25;
    let job_id = engine.start_crawl(opts).await.expect("start");
    tokio::time::sleep(Duration::from_millis(80)).await;
    engine.stop_crawl(job_id).await.expect("stop");

    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Cancelled);
    let events = engine.storage().queue_events(job_id).await.expect("events");
    assert!(!events.is_empty(), "queue events survive a stop");
}
