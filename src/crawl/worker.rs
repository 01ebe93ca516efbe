//! Crawl workers
//!
//! A bounded set of workers share one job's queue, pacer and pipeline.
//! Cancellation is cooperative: a pause or stop signal lets the current
//! request finish, then the worker exits. The queue is left intact.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::CrawlOptions;
use crate::error::CrawlError;
use crate::events::{ProblemSeverity, ProgressUpdate, TelemetryBus, TelemetryEvent};
use crate::fetch::{FetchDisposition, FetchPipeline, ProcessReport};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::pacer::HostPacer;
use crate::planner::{PlanContext, PlanTracker, Planner, StepVerdict};
use crate::queue::{FrontierQueue, PendingRequest, RequestSource};
use crate::storage::{QueueAction, Storage};
use crate::urlstore::UrlStore;

use super::seeder::AdaptiveSeeder;

/// Cooperative control signal shared by a job's workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// Everything a worker touches, shared across the pool
pub struct JobShared {
    pub job_id: i64,
    pub options: Arc<CrawlOptions>,
    pub queue: Arc<FrontierQueue>,
    pub pacer: Arc<HostPacer>,
    pub pipeline: Arc<FetchPipeline>,
    pub bus: Arc<TelemetryBus>,
    pub storage: Storage,
    pub urlstore: Arc<UrlStore>,
    pub gazetteer: Arc<Gazetteer>,
    pub topics: Arc<TopicIndex>,
    pub seeder: AdaptiveSeeder,
    pub planner: Option<Arc<Planner>>,
    pub plan_ctx: Option<PlanContext>,
    pub tracker: Mutex<Option<PlanTracker>>,
    pub pages_done: AtomicU64,
    pub active: AtomicUsize,
    pub budget_hit: AtomicBool,
    pub fatal: AtomicBool,
}

impl JobShared {
    /// True once the configured page budget is consumed
    fn budget_consumed(&self) -> bool {
        self.options
            .page_budget()
            .is_some_and(|budget| self.pages_done.load(Ordering::SeqCst) >= budget)
    }
}

/// One worker's pull-process loop
pub(crate) async fn worker_loop(shared: Arc<JobShared>, mut control: watch::Receiver<ControlSignal>) {
    loop {
        if *control.borrow() != ControlSignal::Run {
            break;
        }
        if shared.fatal.load(Ordering::SeqCst) {
            break;
        }
        if shared.budget_consumed() {
            shared.budget_hit.store(true, Ordering::SeqCst);
            break;
        }

        let Some(req) = shared.queue.dequeue_ready(Instant::now(), &shared.pacer) else {
            // Drained when nothing is pending and nobody is mid-request.
            if shared.queue.is_empty() && shared.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            // Jittered idle wait keeps a pool of workers from polling the
            // queue in lockstep.
            let idle = Duration::from_millis(40 + u64::from(rand::random::<u8>() % 20));
            tokio::select! {
                _ = control.changed() => {}
                () = tokio::time::sleep(idle) => {}
            }
            continue;
        };

        shared.active.fetch_add(1, Ordering::SeqCst);
        let result = shared
            .pipeline
            .process(&req, &shared.queue, &shared.pacer)
            .await;
        shared.active.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(report) => handle_report(&shared, &req, report).await,
            Err(err) => handle_error(&shared, &req, &err),
        }
    }
}

async fn handle_report(shared: &Arc<JobShared>, req: &PendingRequest, report: ProcessReport) {
    let page_counted = matches!(
        report.disposition,
        FetchDisposition::FetchedNetwork
            | FetchDisposition::ServedFromCache
            | FetchDisposition::ServedStale
    );
    if page_counted {
        let done = shared.pages_done.fetch_add(1, Ordering::SeqCst) + 1;
        if done == 1 {
            shared.bus.publish(TelemetryEvent::milestone(
                Some(shared.job_id),
                "first-fetch",
                serde_json::Value::Null,
            ));
        }
        // Per-page progress is the real-time coverage surface.
        if shared.options.features.real_time_coverage {
            shared.bus.publish(TelemetryEvent::progress(
                Some(shared.job_id),
                ProgressUpdate::new(done, shared.options.page_budget(), "crawling").with_details(
                    serde_json::json!({
                        "queued": shared.queue.len(),
                        "links_enqueued": report.links_enqueued,
                    }),
                ),
            ));
        }
    }

    // Plan-directed steps feed the tracker; everything else only feeds
    // the adaptive seeder.
    if req.source == RequestSource::PlanDirected {
        record_plan_step(shared, &report).await;
    }

    let is_article = report
        .analysis
        .as_ref()
        .is_some_and(|a| a.classification.is_article_like());
    if is_article && page_counted {
        seed_hub_candidates(shared, req).await;
    }
}

/// Feed a completed plan-directed request into the tracker
async fn record_plan_step(shared: &Arc<JobShared>, report: &ProcessReport) {
    // Actual value mirrors the planner's value model: discovered work
    // plus a bonus for landing on an article or hub.
    let mut actual = report.links_enqueued as f64 * 10.0;
    if let Some(analysis) = &report.analysis {
        if analysis.classification.is_article_like() {
            actual += 100.0;
        } else if analysis.classification.is_hub() {
            actual += 50.0;
        }
    }

    let verdict = {
        let mut guard = shared.tracker.lock();
        guard.as_mut().map(|tracker| tracker.record(actual))
    };
    match verdict {
        Some(StepVerdict::Backtrack(alternative)) => {
            shared.bus.publish(TelemetryEvent::milestone(
                Some(shared.job_id),
                "plan-backtrack",
                serde_json::json!({ "alternative": alternative.target_url }),
            ));
            enqueue_plan_step(shared, &alternative.target_url, alternative.expected_value).await;
        }
        Some(StepVerdict::Done | StepVerdict::Abort) => {
            let tracker = shared.tracker.lock().take();
            if let (Some(tracker), Some(planner)) = (tracker, shared.planner.as_ref()) {
                if let Err(e) = planner.record_outcome(&tracker, Some(shared.job_id)).await {
                    log::warn!("failed to record plan outcome: {e}");
                }
            }
        }
        _ => {}
    }
}

/// Intern and enqueue one plan-directed target
pub(crate) async fn enqueue_plan_step(shared: &Arc<JobShared>, target_url: &str, expected_value: f64) {
    let Ok(url_id) = shared.urlstore.intern(target_url).await else {
        return;
    };
    let Ok(canonical) = shared.urlstore.resolve(url_id).await else {
        return;
    };
    let host = url::Url::parse(&canonical)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let priority = super::priority::compute_priority(
        RequestSource::PlanDirected,
        0,
        &canonical,
        &shared.gazetteer,
        &shared.topics,
        shared.pipeline.host_scores.score(&host),
    );
    let accepted = shared.queue.enqueue(PendingRequest {
        url_id,
        host,
        priority,
        depth: 0,
        source: RequestSource::PlanDirected,
        job_id: shared.job_id,
        expected_value: Some(expected_value),
    });
    if accepted {
        let _ = shared
            .storage
            .log_queue_event(shared.job_id, QueueAction::Enqueued, url_id, 0)
            .await;
    }
}

/// Propose, simulate and enqueue hub candidates after an article
async fn seed_hub_candidates(shared: &Arc<JobShared>, req: &PendingRequest) {
    let Ok(article_url) = shared.urlstore.resolve(req.url_id).await else {
        return;
    };
    // With a planner context, candidates are priced by tactical
    // simulation; without one, the pattern-based proposer stands in.
    let candidates = match shared.plan_ctx.as_ref() {
        Some(ctx) => shared
            .seeder
            .propose(&article_url, ctx, &shared.gazetteer, &shared.topics),
        None => shared
            .seeder
            .propose_fallback(&article_url, &shared.gazetteer, &shared.topics),
    };
    for candidate in candidates {
        let Ok(url_id) = shared.urlstore.intern(&candidate.url).await else {
            continue;
        };
        let Ok(canonical) = shared.urlstore.resolve(url_id).await else {
            continue;
        };
        let host = url::Url::parse(&canonical)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let priority = super::priority::compute_priority(
            RequestSource::HubCandidate,
            req.depth,
            &canonical,
            &shared.gazetteer,
            &shared.topics,
            shared.pipeline.host_scores.score(&host),
        );
        let accepted = shared.queue.enqueue(PendingRequest {
            url_id,
            host,
            priority,
            depth: req.depth,
            source: RequestSource::HubCandidate,
            job_id: shared.job_id,
            expected_value: Some(candidate.expected_value),
        });
        if accepted {
            let _ = shared
                .storage
                .log_queue_event(shared.job_id, QueueAction::Enqueued, url_id, req.depth)
                .await;
        }
    }
}

fn handle_error(shared: &Arc<JobShared>, req: &PendingRequest, err: &CrawlError) {
    if err.is_recoverable() {
        // Recoverable kinds were already settled and reported inside the
        // pipeline; nothing more to do here.
        return;
    }
    shared.bus.publish(TelemetryEvent::problem(
        Some(shared.job_id),
        ProblemSeverity::Critical,
        err.code(),
        format!("worker halting on url {}: {err}", req.url_id),
        Some(req.url_id.0),
    ));
    shared.fatal.store(true, Ordering::SeqCst);
}
