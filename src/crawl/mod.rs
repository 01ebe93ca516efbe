//! Crawl job controller
//!
//! Owns the lifecycle of one crawl: its frontier queue, pacer, worker
//! pool and (for intelligent crawls) its plan tracker. Start, pause,
//! resume and stop are cooperative; the queue survives pauses through
//! persisted queue events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::HttpCache;
use crate::config::{CrawlOptions, CrawlType};
use crate::error::{CrawlError, Result};
use crate::events::{TelemetryBus, TelemetryEvent};
use crate::fetch::{FetchPipeline, Fetcher};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::pacer::{HostPacer, PacerConfig, RobotsGate};
use crate::planner::{Plan, PlanGoal, Planner, TrackerConfig};
use crate::queue::{FrontierQueue, PendingRequest, RequestSource};
use crate::storage::{JobStatus, QueueAction, Storage};
use crate::urlstore::UrlStore;

pub mod priority;
pub mod seeder;
pub mod worker;

pub use priority::{compute_priority, HostScores};
pub use seeder::{AdaptiveSeeder, SeedCandidate};
pub use worker::ControlSignal;

use worker::JobShared;

/// Process-wide collaborators shared by every job
#[derive(Clone)]
pub struct EngineShared {
    pub storage: Storage,
    pub urlstore: Arc<UrlStore>,
    pub cache: Arc<HttpCache>,
    pub bus: Arc<TelemetryBus>,
    pub gazetteer: Arc<Gazetteer>,
    pub topics: Arc<TopicIndex>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// Controller for one crawl job. The queue, pacer and worker pool are
/// private to the job and never shared across jobs.
pub struct CrawlController {
    shared: Arc<JobShared>,
    engine: EngineShared,
    control: watch::Sender<ControlSignal>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    plan: Option<Plan>,
}

impl CrawlController {
    /// Wire up a controller for an existing job row.
    pub async fn new(
        engine: EngineShared,
        job_id: i64,
        options: CrawlOptions,
        plan: Option<Plan>,
    ) -> Result<Self> {
        let options = Arc::new(options);
        let pacer = Arc::new(HostPacer::new(PacerConfig {
            min_interval: Duration::from_millis(options.min_interval_ms),
            backoff_ceiling: Duration::from_secs(300),
            max_in_flight: 1,
        }));
        let robots = Arc::new(RobotsGate::new(options.user_agent.clone()));
        let queue = Arc::new(FrontierQueue::new(job_id));
        let host_scores = Arc::new(HostScores::new());

        let pipeline = Arc::new(FetchPipeline::new(
            engine.storage.clone(),
            Arc::clone(&engine.urlstore),
            Arc::clone(&engine.cache),
            robots,
            Arc::clone(&engine.fetcher),
            Arc::clone(&engine.bus),
            Arc::clone(&engine.gazetteer),
            Arc::clone(&engine.topics),
            Arc::clone(&options),
            host_scores,
        ));

        // Intelligent crawls carry a planner for seeding and learning.
        let (planner, plan_ctx) = if options.crawl_type == CrawlType::Intelligent {
            let planner = Arc::new(Planner::new(
                engine.storage.clone(),
                Arc::clone(&engine.gazetteer),
                Arc::clone(&engine.topics),
                crate::planner::SearchConfig {
                    max_lookahead: options.planning.max_lookahead,
                    max_branches: options.planning.max_branches,
                    budget: Duration::from_millis(options.planning.budget_ms),
                    prune_ratio: 0.5,
                },
                options.planning.learning_enabled,
                options.features.planner_knowledge_reuse,
            ));
            let goal = if options.features.gap_driven {
                PlanGoal::CoverGaps
            } else {
                PlanGoal::MaximiseArticles
            };
            let ctx = planner.build_context(&options.seed_url, goal).await?;
            (Some(planner), Some(ctx))
        } else {
            (None, None)
        };

        let tracker = plan.as_ref().map(|p| {
            crate::planner::PlanTracker::new(
                p.clone(),
                TrackerConfig {
                    max_backtracks: options.planning.max_backtracks,
                    ..TrackerConfig::default()
                },
            )
        });

        let (control, _) = watch::channel(ControlSignal::Run);
        let shared = Arc::new(JobShared {
            job_id,
            options: Arc::clone(&options),
            queue,
            pacer,
            pipeline,
            bus: Arc::clone(&engine.bus),
            storage: engine.storage.clone(),
            urlstore: Arc::clone(&engine.urlstore),
            gazetteer: Arc::clone(&engine.gazetteer),
            topics: Arc::clone(&engine.topics),
            seeder: AdaptiveSeeder::new(options.planning.simulation_candidates),
            planner,
            plan_ctx,
            tracker: Mutex::new(tracker),
            pages_done: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            budget_hit: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        });

        Ok(Self {
            shared,
            engine,
            control,
            supervisor: Mutex::new(None),
            plan,
        })
    }

    /// The job this controller drives
    #[must_use]
    pub fn job_id(&self) -> i64 {
        self.shared.job_id
    }

    /// Seed the queue: plan steps first (highest bucket), then the seed
    /// URL and, for sitemap-aware crawl types, the sitemap probe.
    pub async fn seed(&self) -> Result<()> {
        if let Some(plan) = &self.plan {
            for step in &plan.steps {
                worker::enqueue_plan_step(&self.shared, &step.target_url, step.expected_value).await;
            }
        }

        let options = &self.shared.options;
        if options.crawl_type != CrawlType::SitemapOnly && !options.seed_url.is_empty() {
            self.enqueue_seed(&options.seed_url, RequestSource::Discovery)
                .await?;
        }
        if matches!(
            options.crawl_type,
            CrawlType::BasicWithSitemap | CrawlType::SitemapOnly
        ) {
            if let Ok(parsed) = url::Url::parse(&options.seed_url) {
                let sitemap = format!(
                    "{}://{}/sitemap.xml",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or_default()
                );
                self.enqueue_seed(&sitemap, RequestSource::Discovery).await?;
            }
        }

        self.engine.bus.publish(TelemetryEvent::milestone(
            Some(self.shared.job_id),
            "pipeline-configured",
            serde_json::json!({
                "crawl_type": options.crawl_type.as_str(),
                "concurrency": options.concurrency,
                "queued": self.shared.queue.len(),
            }),
        ));
        Ok(())
    }

    async fn enqueue_seed(&self, url: &str, source: RequestSource) -> Result<()> {
        let url_id = self.engine.urlstore.intern(url).await?;
        let canonical = self.engine.urlstore.resolve(url_id).await?;
        let host = url::Url::parse(&canonical)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let priority = compute_priority(
            source,
            0,
            &canonical,
            &self.engine.gazetteer,
            &self.engine.topics,
            0.5,
        );
        let accepted = self.shared.queue.enqueue(PendingRequest {
            url_id,
            host,
            priority,
            depth: 0,
            source,
            job_id: self.shared.job_id,
            expected_value: None,
        });
        if accepted {
            self.engine
                .storage
                .log_queue_event(self.shared.job_id, QueueAction::Enqueued, url_id, 0)
                .await?;
        }
        Ok(())
    }

    /// Spawn the worker pool and the supervisor that settles the job's
    /// final status when the pool drains.
    pub async fn start(&self) -> Result<()> {
        self.engine
            .storage
            .set_job_status(self.shared.job_id, JobStatus::Running, None)
            .await?;
        let _ = self.control.send(ControlSignal::Run);
        self.spawn_workers();
        Ok(())
    }

    fn spawn_workers(&self) {
        let concurrency = self.shared.options.concurrency.max(1);
        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let shared = Arc::clone(&self.shared);
            let control = self.control.subscribe();
            handles.push(tokio::spawn(worker::worker_loop(shared, control)));
        }

        let shared = Arc::clone(&self.shared);
        let control = self.control.subscribe();
        let supervisor = tokio::spawn(async move {
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    log::error!("crawl worker panicked: {e}");
                }
            }
            settle_job(&shared, &control).await;
        });
        *self.supervisor.lock() = Some(supervisor);
    }

    /// Pause: workers finish their current request and exit; the queue's
    /// persisted reflection survives for resumption.
    pub async fn pause(&self) -> Result<()> {
        let _ = self.control.send(ControlSignal::Pause);
        self.await_supervisor().await;
        Ok(())
    }

    /// Resume a paused job: rehydrate the frontier and respawn the pool.
    pub async fn resume(&self) -> Result<()> {
        let job = self.engine.storage.get_job(self.shared.job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(CrawlError::precondition(
                "job-not-paused",
                format!("job {} is {}", self.shared.job_id, job.status.as_str()),
            ));
        }
        self.shared.queue.reload(&self.engine.storage).await?;
        self.shared.fatal.store(false, Ordering::SeqCst);
        self.engine
            .storage
            .set_job_status(self.shared.job_id, JobStatus::Running, None)
            .await?;
        let _ = self.control.send(ControlSignal::Run);
        self.spawn_workers();
        Ok(())
    }

    /// Stop: workers exit after their current request; the job ends as
    /// cancelled. The queue is preserved in storage.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.control.send(ControlSignal::Stop);
        self.await_supervisor().await;
        // A job stopped while paused has no supervisor to settle it.
        let job = self.engine.storage.get_job(self.shared.job_id).await?;
        if job.status.is_incomplete() {
            self.engine
                .storage
                .set_job_status(self.shared.job_id, JobStatus::Cancelled, Some("operator-stop"))
                .await?;
        }
        Ok(())
    }

    /// Block until the current worker pool has fully drained and the job
    /// status is settled. Used by tests and the batch entry point.
    pub async fn join(&self) {
        self.await_supervisor().await;
    }

    async fn await_supervisor(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("crawl supervisor panicked: {e}");
            }
        }
    }

    /// Pages fetched so far
    #[must_use]
    pub fn pages_done(&self) -> u64 {
        self.shared.pages_done.load(Ordering::SeqCst)
    }

    /// Summary statistics for the job's internal queue
    #[must_use]
    pub fn queue_summary(&self) -> serde_json::Value {
        let (discovery, acquisition, plan_directed) = self.shared.queue.size_by_bucket();
        serde_json::json!({
            "pending": self.shared.queue.len(),
            "discovery": discovery,
            "acquisition": acquisition,
            "plan_directed": plan_directed,
            "hosts": self.shared.queue.domains().len(),
            "visited": self.shared.queue.visited_count(),
        })
    }
}

/// Decide and persist the job's final status once the pool has drained
async fn settle_job(shared: &Arc<JobShared>, control: &watch::Receiver<ControlSignal>) {
    let signal = *control.borrow();
    let (status, reason) = if shared.fatal.load(Ordering::SeqCst) {
        (JobStatus::Paused, Some("storage-failure"))
    } else {
        match signal {
            ControlSignal::Pause => (JobStatus::Paused, None),
            ControlSignal::Stop => (JobStatus::Cancelled, Some("operator-stop")),
            ControlSignal::Run => {
                if shared.budget_hit.load(Ordering::SeqCst) {
                    (JobStatus::Completed, Some("budget-reached"))
                } else {
                    (JobStatus::Completed, Some("frontier-drained"))
                }
            }
        }
    };

    // A plan still mid-flight when the crawl ends is recorded as-is.
    let tracker = shared.tracker.lock().take();
    if let (Some(tracker), Some(planner)) = (tracker, shared.planner.as_ref()) {
        if let Err(e) = planner.record_outcome(&tracker, Some(shared.job_id)).await {
            log::warn!("failed to record plan outcome at job end: {e}");
        }
    }

    if let Err(e) = shared
        .storage
        .set_job_status(shared.job_id, status, reason)
        .await
    {
        log::error!("failed to persist final job status: {e}");
    }

    match status {
        JobStatus::Completed => {
            let name = if reason == Some("budget-reached") {
                "budget-reached"
            } else {
                "crawl-complete"
            };
            let details = serde_json::json!({
                "pages": shared.pages_done.load(Ordering::SeqCst),
            });
            if let Err(e) = shared
                .storage
                .put_milestone(Some(shared.job_id), name, &details)
                .await
            {
                log::error!("failed to persist completion milestone: {e}");
            }
            shared
                .bus
                .publish(TelemetryEvent::milestone(Some(shared.job_id), name, details));
        }
        JobStatus::Paused if shared.fatal.load(Ordering::SeqCst) => {
            shared.bus.publish(TelemetryEvent::problem(
                Some(shared.job_id),
                crate::events::ProblemSeverity::Critical,
                "job-paused",
                "job paused after unrecoverable error; operator intervention required",
                None,
            ));
        }
        _ => {}
    }
}
