//! Planning sessions: preview, confirm, cancel, expiry, fingerprints

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{seed_news_site, StubFetcher};
use newswire_crawler::config::{CrawlOptions, CrawlType};
use newswire_crawler::error::CrawlError;
use newswire_crawler::events::{PlanSessionStatus, TelemetryEvent};
use newswire_crawler::service::CrawlEngine;
use newswire_crawler::storage::JobStatus;
use tempfile::TempDir;

async fn engine_with(fetcher: Arc<StubFetcher>) -> (CrawlEngine, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let engine = CrawlEngine::open_with_fetcher(dir.path(), fetcher)
        .await
        .expect("open engine");
    (engine, dir)
}

fn intelligent_options(seed: &str) -> CrawlOptions {
    CrawlOptions::builder()
        .seed_url(seed)
        .crawl_type(CrawlType::Intelligent)
        .concurrency(1)
        .max_depth(1)
        .max_pages(50)
        .min_interval_ms(0)
        .build()
        .expect("options")
}

async fn wait_ready(engine: &CrawlEngine, session_id: &str) {
    for _ in 0..200 {
        let session = engine
            .sessions()
            .get_read_only(session_id)
            .expect("session");
        match session.status {
            PlanSessionStatus::Ready => return,
            PlanSessionStatus::Failed => panic!("planning failed"),
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    panic!("session never became ready");
}

#[tokio::test]
async fn preview_streams_stages_then_exactly_one_blueprint() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 5);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let mut events = engine.bus().subscribe();
    let handle = engine
        .plan(intelligent_options("https://news.example/"))
        .await
        .expect("plan");
    wait_ready(&engine, &handle.session_id).await;

    let mut saw_planning = false;
    let mut stage_count = 0;
    let mut previews = 0;
    // The preview event lands shortly after the session flips to ready;
    // drain with a timeout rather than racing try_recv against it.
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        match event {
            TelemetryEvent::PlanStatus { status, session_id, .. }
                if session_id == handle.session_id =>
            {
                if status == PlanSessionStatus::Planning {
                    saw_planning = true;
                }
            }
            TelemetryEvent::PlanStage { session_id, .. } if session_id == handle.session_id => {
                stage_count += 1;
            }
            TelemetryEvent::PlanPreview {
                session_id,
                blueprint,
                ..
            } if session_id == handle.session_id => {
                previews += 1;
                let hubs = blueprint
                    .pointer("/seeded_hubs")
                    .and_then(serde_json::Value::as_array)
                    .expect("seeded hubs array");
                assert!(!hubs.is_empty(), "blueprint seeds no hubs");
            }
            _ => {}
        }
    }
    assert!(saw_planning, "no plan-status: planning event");
    assert!(stage_count >= 1, "no plan-stage events");
    assert_eq!(previews, 1, "expected exactly one plan-preview");
}

#[tokio::test]
async fn confirm_starts_exactly_one_job_and_is_not_repeatable() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 5);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let handle = engine
        .plan(intelligent_options("https://news.example/"))
        .await
        .expect("plan");
    wait_ready(&engine, &handle.session_id).await;

    let job_id = engine
        .confirm_plan(&handle.session_id, handle.fingerprint)
        .await
        .expect("confirm");
    let session = engine
        .sessions()
        .get_read_only(&handle.session_id)
        .expect("session");
    assert_eq!(session.status, PlanSessionStatus::Confirmed);

    engine.join_crawl(job_id).await.expect("join");
    let job = engine.storage().get_job(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.plan_id.is_some(), "job carries its plan");

    // Confirming twice is a precondition failure, not a second job.
    let second = engine
        .confirm_plan(&handle.session_id, handle.fingerprint)
        .await;
    assert!(matches!(
        second,
        Err(CrawlError::PreconditionFailed { code: "session-confirmed", .. })
    ));
}

#[tokio::test]
async fn stale_fingerprint_is_rejected_but_session_survives() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 3);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let handle = engine
        .plan(intelligent_options("https://news.example/"))
        .await
        .expect("plan");
    wait_ready(&engine, &handle.session_id).await;

    let stale = engine
        .confirm_plan(&handle.session_id, handle.fingerprint ^ 1)
        .await;
    assert!(matches!(
        stale,
        Err(CrawlError::PreconditionFailed { code: "stale-confirmation", .. })
    ));

    // The genuine fingerprint still works afterwards.
    let job_id = engine
        .confirm_plan(&handle.session_id, handle.fingerprint)
        .await
        .expect("confirm");
    engine.join_crawl(job_id).await.expect("join");
}

#[tokio::test]
async fn one_active_session_per_domain_until_released() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 3);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let first = engine
        .plan(intelligent_options("https://news.example/"))
        .await
        .expect("plan");

    let second = engine.plan(intelligent_options("https://news.example/")).await;
    assert!(matches!(
        second,
        Err(CrawlError::PreconditionFailed { code: "session-active", .. })
    ));

    // Cancelling releases the domain.
    wait_ready(&engine, &first.session_id).await;
    engine.cancel_plan(&first.session_id).expect("cancel");
    let third = engine.plan(intelligent_options("https://news.example/")).await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn cancelled_session_cannot_be_confirmed() {
    let fetcher = StubFetcher::new();
    seed_news_site(&fetcher, "https://news.example", 3);
    let (engine, _dir) = engine_with(Arc::clone(&fetcher)).await;

    let handle = engine
        .plan(intelligent_options("https://news.example/"))
        .await
        .expect("plan");
    wait_ready(&engine, &handle.session_id).await;
    engine.cancel_plan(&handle.session_id).expect("cancel");

    let confirm = engine
        .confirm_plan(&handle.session_id, handle.fingerprint)
        .await;
    assert!(matches!(
        confirm,
        Err(CrawlError::PreconditionFailed { code: "session-not-ready", .. })
    ));
}

#[tokio::test]
async fn unknown_session_is_invalid_input() {
    let fetcher = StubFetcher::new();
    let (engine, _dir) = engine_with(fetcher).await;
    let result = engine.confirm_plan("no-such-session", 0).await;
    assert!(matches!(result, Err(CrawlError::InvalidInput(_))));
}
