//! Control surface
//!
//! The operations users drive the engine with: plan / confirm / cancel,
//! start / pause / resume / stop, task management and ingestion. Users
//! operate on jobs and sessions; queues stay internal and surface only
//! as summary statistics.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::{CacheTtlPolicy, HttpCache};
use crate::config::CrawlOptions;
use crate::crawl::{CrawlController, EngineShared};
use crate::error::{CrawlError, Result};
use crate::events::TelemetryBus;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::ingest::{default_stages, ingestor_for_source, IngestContext, StagedCoordinator};
use crate::pacer::RobotsGate;
use crate::planner::{
    options_fingerprint, ActionKind, PlanBlueprint, PlanGoal, Planner, SearchConfig, SessionManager,
};
use crate::storage::{JobStatus, QueueAction, Storage};
use crate::tasks::{BackgroundTaskManager, TaskRegistry};
use crate::urlstore::{CanonicalPolicy, UrlStore};

/// Returned by `plan`; the fingerprint must accompany the confirm
#[derive(Debug, Clone)]
pub struct PlanHandle {
    pub session_id: String,
    pub fingerprint: u64,
}

/// One row of `list_incomplete_crawls`
#[derive(Debug, Clone)]
pub struct IncompleteCrawl {
    pub job_id: i64,
    pub seed_url: String,
    pub status: JobStatus,
    pub queue_depth: u64,
    pub visited_count: u64,
}

/// The engine facade; one per process
pub struct CrawlEngine {
    shared: EngineShared,
    sessions: Arc<SessionManager>,
    jobs: DashMap<i64, Arc<CrawlController>>,
    tasks: BackgroundTaskManager,
    robots: Arc<RobotsGate>,
    multi_job: bool,
}

impl CrawlEngine {
    /// Open the engine over a data directory with a real HTTP fetcher.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            "newswire-crawler/0.3",
            Duration::from_secs(30),
        )?);
        Self::open_with_fetcher(data_dir, fetcher).await
    }

    /// Open with an injected fetcher; tests use canned responders.
    pub async fn open_with_fetcher(data_dir: &Path, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Self::open_with_cache_policy(data_dir, fetcher, CacheTtlPolicy::default()).await
    }

    /// Open with explicit cache TTLs, typically built from the
    /// `cache.ttl` configuration map via `CacheTtlPolicy::from_secs_map`.
    pub async fn open_with_cache_policy(
        data_dir: &Path,
        fetcher: Arc<dyn Fetcher>,
        ttl_policy: CacheTtlPolicy,
    ) -> Result<Self> {
        let storage = Storage::open(data_dir).await?;
        Self::assemble(storage, fetcher, ttl_policy).await
    }

    async fn assemble(
        storage: Storage,
        fetcher: Arc<dyn Fetcher>,
        ttl_policy: CacheTtlPolicy,
    ) -> Result<Self> {
        let urlstore = Arc::new(UrlStore::new(
            storage.pool().clone(),
            CanonicalPolicy::default(),
        ));
        let bus = Arc::new(TelemetryBus::new());
        let cache = Arc::new(HttpCache::with_policy(ttl_policy, 256 * 1024 * 1024));
        let gazetteer = Arc::new(Gazetteer::load(&storage).await?);
        let topics = Arc::new(TopicIndex::default_news());

        let tasks = BackgroundTaskManager::new(
            storage.clone(),
            Arc::clone(&bus),
            Arc::clone(&gazetteer),
            Arc::clone(&topics),
            TaskRegistry::with_builtins(),
            num_cpus::get().clamp(1, 4),
        );
        // Tasks left running by a previous process come back paused.
        tasks.rehydrate().await?;

        let shared = EngineShared {
            storage,
            urlstore,
            cache,
            bus: Arc::clone(&bus),
            gazetteer,
            topics,
            fetcher,
        };

        Ok(Self {
            robots: Arc::new(RobotsGate::new("newswire-crawler/0.3")),
            sessions: Arc::new(SessionManager::new(bus)),
            jobs: DashMap::new(),
            tasks,
            shared,
            multi_job: false,
        })
    }

    /// Allow more than one crawl job to run concurrently
    #[must_use]
    pub fn with_multi_job(mut self, multi_job: bool) -> Self {
        self.multi_job = multi_job;
        self
    }

    /// The telemetry bus, for subscribers
    #[must_use]
    pub fn bus(&self) -> &Arc<TelemetryBus> {
        &self.shared.bus
    }

    /// Storage handle, for read-side consumers
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.shared.storage
    }

    /// The session manager, for observers
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Open a planning session: the strategic search runs on its own
    /// task, streaming plan-stage events, and finishes with a preview.
    pub async fn plan(&self, options: CrawlOptions) -> Result<PlanHandle> {
        let canonical_seed = self
            .shared
            .urlstore
            .canonical_form(&options.seed_url)?;
        let domain = url::Url::parse(&canonical_seed)
            .map_err(|e| CrawlError::InvalidInput(format!("bad seed: {e}")))?
            .host_str()
            .unwrap_or_default()
            .to_string();

        let options_json = serde_json::to_value(&options)
            .map_err(|e| CrawlError::Internal(format!("encode options: {e}")))?;
        let fingerprint = options_fingerprint(&options_json);
        let session_id = self.sessions.create(&domain, options_json)?;

        let sessions = Arc::clone(&self.sessions);
        let storage = self.shared.storage.clone();
        let gazetteer = Arc::clone(&self.shared.gazetteer);
        let topics = Arc::clone(&self.shared.topics);
        let spawned_session = session_id.clone();
        let seed = canonical_seed.clone();
        let planning = options.planning.clone();
        let knowledge_reuse = options.features.planner_knowledge_reuse;
        let goal = if options.features.gap_driven {
            PlanGoal::CoverGaps
        } else {
            PlanGoal::MaximiseArticles
        };

        tokio::spawn(async move {
            let planner = Planner::new(
                storage,
                gazetteer,
                topics,
                SearchConfig {
                    max_lookahead: planning.max_lookahead,
                    max_branches: planning.max_branches,
                    budget: Duration::from_millis(planning.budget_ms),
                    prune_ratio: 0.5,
                },
                planning.learning_enabled,
                knowledge_reuse,
            );

            let _ = sessions.append_stage_event(
                &spawned_session,
                "context-loaded",
                serde_json::json!({ "seed": seed }),
            );

            match planner.strategic(&seed, goal).await {
                Ok(outcome) => {
                    let _ = sessions.append_stage_event(
                        &spawned_session,
                        "search-complete",
                        serde_json::json!({
                            "branches_explored": outcome.branches_explored,
                            "budget_exhausted": outcome.budget_exhausted,
                        }),
                    );
                    let seeded_hubs: Vec<String> = outcome
                        .plan
                        .steps
                        .iter()
                        .filter(|s| {
                            matches!(s.action, ActionKind::ExploreHub | ActionKind::DiscoverLinks)
                        })
                        .map(|s| s.target_url.clone())
                        .collect();
                    let summary = serde_json::json!({
                        "steps": outcome.plan.steps.len(),
                        "estimated_value": outcome.plan.estimated_value,
                        "estimated_cost": outcome.plan.estimated_cost,
                        "seeded_hubs": seeded_hubs.len(),
                    });
                    let blueprint = PlanBlueprint {
                        plan: outcome.plan,
                        seeded_hubs,
                        summary,
                    };
                    if let Err(e) = sessions.complete_with_blueprint(&spawned_session, blueprint) {
                        log::warn!("could not complete session {spawned_session}: {e}");
                    }
                }
                Err(e) => {
                    let _ = sessions.fail(&spawned_session, &e.to_string());
                }
            }
        });

        Ok(PlanHandle {
            session_id,
            fingerprint,
        })
    }

    /// Confirm a previewed session into a running crawl job.
    pub async fn confirm_plan(&self, session_id: &str, fingerprint: u64) -> Result<i64> {
        self.ensure_job_slot().await?;
        let confirmed = self.sessions.confirm(session_id, fingerprint)?;

        let mut options: CrawlOptions = serde_json::from_value(confirmed.options)
            .map_err(|e| CrawlError::Internal(format!("stored session options invalid: {e}")))?;
        options.recompile_patterns()?;

        // Confirm-time plan validation: drop steps whose target is
        // malformed or robots-disallowed.
        let mut plan = confirmed.blueprint.plan;
        let mut validated = Vec::with_capacity(plan.steps.len());
        for step in plan.steps {
            if self.shared.urlstore.canonical_form(&step.target_url).is_err() {
                continue;
            }
            match self
                .robots
                .allowed(&step.target_url, self.shared.fetcher.as_ref())
                .await
            {
                Ok(true) | Err(_) => validated.push(step),
                Ok(false) => {
                    log::info!("dropping robots-disallowed plan step {}", step.target_url);
                }
            }
        }
        plan.steps = validated;

        let seed_id = self.shared.urlstore.intern(&options.seed_url).await?;
        let args = serde_json::to_value(&options)
            .map_err(|e| CrawlError::Internal(format!("encode job args: {e}")))?;
        let job_id = self.shared.storage.create_job(seed_id, &args).await?;
        if let Some(plan_id) = plan.id {
            self.shared.storage.set_job_plan(job_id, plan_id).await?;
        }

        let controller = Arc::new(
            CrawlController::new(self.shared.clone(), job_id, options, Some(plan)).await?,
        );
        controller.seed().await?;
        controller.start().await?;
        self.jobs.insert(job_id, controller);
        Ok(job_id)
    }

    /// Cancel a planning session
    pub fn cancel_plan(&self, session_id: &str) -> Result<()> {
        self.sessions.cancel(session_id)
    }

    /// Legacy bypass: start a crawl without a preview
    pub async fn start_crawl(&self, options: CrawlOptions) -> Result<i64> {
        self.ensure_job_slot().await?;
        let seed_id = self.shared.urlstore.intern(&options.seed_url).await?;
        let args = serde_json::to_value(&options)
            .map_err(|e| CrawlError::Internal(format!("encode job args: {e}")))?;
        let job_id = self.shared.storage.create_job(seed_id, &args).await?;
        let controller =
            Arc::new(CrawlController::new(self.shared.clone(), job_id, options, None).await?);
        controller.seed().await?;
        controller.start().await?;
        self.jobs.insert(job_id, controller);
        Ok(job_id)
    }

    /// Pause a running crawl
    pub async fn pause_crawl(&self, job_id: i64) -> Result<()> {
        self.controller(job_id).await?.pause().await
    }

    /// Resume a paused crawl, rehydrating its queue from queue events
    pub async fn resume_crawl(&self, job_id: i64) -> Result<()> {
        self.controller(job_id).await?.resume().await
    }

    /// Stop a crawl; its queue state stays persisted
    pub async fn stop_crawl(&self, job_id: i64) -> Result<()> {
        self.controller(job_id).await?.stop().await
    }

    /// Block until a job's current worker pool drains (test/batch aid)
    pub async fn join_crawl(&self, job_id: i64) -> Result<()> {
        self.controller(job_id).await?.join().await;
        Ok(())
    }

    /// Incomplete jobs with queue summary statistics
    pub async fn list_incomplete_crawls(&self) -> Result<Vec<IncompleteCrawl>> {
        let mut out = Vec::new();
        for job in self.shared.storage.get_incomplete_jobs().await? {
            let seed_url = self.shared.urlstore.resolve(job.url_id).await?;
            let visited = self
                .shared
                .storage
                .count_queue_events(job.id, QueueAction::Visited)
                .await?
                + self
                    .shared
                    .storage
                    .count_queue_events(job.id, QueueAction::Saved)
                    .await?;
            let queue_depth = match self.jobs.get(&job.id) {
                Some(controller) => controller
                    .queue_summary()
                    .get("pending")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0),
                None => pending_from_events(&self.shared.storage, job.id).await?,
            };
            out.push(IncompleteCrawl {
                job_id: job.id,
                seed_url,
                status: job.status,
                queue_depth,
                visited_count: visited,
            });
        }
        Ok(out)
    }

    /// Create a background task
    pub async fn create_task(&self, kind: &str, params: serde_json::Value) -> Result<i64> {
        self.tasks.create(kind, params).await
    }

    /// Start or resume a background task
    pub async fn start_task(&self, task_id: i64) -> Result<()> {
        self.tasks.start(task_id).await
    }

    /// Pause a background task
    pub async fn pause_task(&self, task_id: i64) -> Result<()> {
        self.tasks.pause(task_id).await
    }

    /// Resume a paused background task
    pub async fn resume_task(&self, task_id: i64) -> Result<()> {
        self.tasks.resume(task_id).await
    }

    /// Stop a background task
    pub async fn stop_task(&self, task_id: i64) -> Result<()> {
        self.tasks.stop(task_id).await
    }

    /// The task manager, for direct access
    #[must_use]
    pub fn tasks(&self) -> &BackgroundTaskManager {
        &self.tasks
    }

    /// Run a single ingestion source to completion.
    ///
    /// Returns the run ID, or `PreconditionFailed` when the `(source,
    /// version)` already completed and `force` is off.
    pub async fn start_ingestion(
        &self,
        source: &str,
        source_version: &str,
        force: bool,
    ) -> Result<i64> {
        let ingestor = ingestor_for_source(source)
            .ok_or_else(|| CrawlError::InvalidInput(format!("unknown ingestion source {source:?}")))?;
        if ingestor.source_version() != source_version {
            return Err(CrawlError::InvalidInput(format!(
                "source {source} is at version {}, requested {source_version}",
                ingestor.source_version()
            )));
        }

        let run_id = self
            .shared
            .storage
            .start_ingestion_run(source, source_version, force)
            .await?;

        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let ctx = IngestContext {
            storage: self.shared.storage.clone(),
            cache: Arc::clone(&self.shared.cache),
            fetcher: Arc::clone(&self.shared.fetcher),
            bus: Arc::clone(&self.shared.bus),
            cancel: cancel_rx,
            force,
        };
        match ingestor.execute(&ctx).await {
            Ok(summary) => {
                self.shared
                    .storage
                    .complete_ingestion_run(run_id, "completed", &summary.to_json())
                    .await?;
                Ok(run_id)
            }
            Err(e) => {
                self.shared
                    .storage
                    .complete_ingestion_run(
                        run_id,
                        "failed",
                        &serde_json::json!({ "error": e.to_string() }),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Run the full staged geography pipeline
    pub async fn run_geography(&self, max_depth: u32, force: bool) -> Result<()> {
        let coordinator = StagedCoordinator::new(
            self.shared.storage.clone(),
            Arc::clone(&self.shared.cache),
            Arc::clone(&self.shared.fetcher),
            Arc::clone(&self.shared.bus),
            default_stages(),
        );
        coordinator.run(max_depth, force).await?;
        Ok(())
    }

    async fn ensure_job_slot(&self) -> Result<()> {
        if self.multi_job {
            return Ok(());
        }
        for job in self.shared.storage.get_incomplete_jobs().await? {
            if job.status == JobStatus::Running {
                return Err(CrawlError::precondition(
                    "crawl-active",
                    format!("job {} is already running and multi-job mode is off", job.id),
                ));
            }
        }
        Ok(())
    }

    /// Controller for a job, reconstructing one from storage when the
    /// process was restarted since the job last ran.
    async fn controller(&self, job_id: i64) -> Result<Arc<CrawlController>> {
        if let Some(existing) = self.jobs.get(&job_id) {
            return Ok(Arc::clone(existing.value()));
        }
        let job = self.shared.storage.get_job(job_id).await?;
        let mut options: CrawlOptions = serde_json::from_value(job.args)
            .map_err(|e| CrawlError::Internal(format!("stored job args invalid: {e}")))?;
        options.recompile_patterns()?;
        let controller =
            Arc::new(CrawlController::new(self.shared.clone(), job_id, options, None).await?);
        self.jobs.insert(job_id, Arc::clone(&controller));
        Ok(controller)
    }
}

/// Pending depth for a job with no live controller, derived from events
async fn pending_from_events(storage: &Storage, job_id: i64) -> Result<u64> {
    let events = storage.queue_events(job_id).await?;
    let mut pending = std::collections::HashSet::new();
    for event in events {
        match event.action {
            QueueAction::Discovered | QueueAction::Enqueued => {
                pending.insert(event.url_id);
            }
            action if action.is_terminal() => {
                pending.remove(&event.url_id);
            }
            _ => {}
        }
    }
    Ok(pending.len() as u64)
}
