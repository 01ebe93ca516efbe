//! Background task manager
//!
//! An in-process pool over existing data, exposing the same
//! pause/resume/telemetry contract as crawls with a different execution
//! model: parallel tasks over rows instead of networked workers over a
//! queue. Tasks persist status and progress; on process restart, tasks
//! found `running` are rehydrated to `paused`, never silently resumed.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{CrawlError, Result};
use crate::events::{ProblemSeverity, TelemetryBus, TelemetryEvent};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::storage::{Storage, TaskStatus};

pub mod kinds;

pub use kinds::{
    AnalyseJob, BackgroundJob, CompressJob, ExportJob, TaskContext, TaskRegistry, TaskSignal,
    VacuumJob,
};

struct RunningTask {
    signal: watch::Sender<TaskSignal>,
    handle: JoinHandle<()>,
}

/// Owns the task pool and the lifecycle of every background task
pub struct BackgroundTaskManager {
    storage: Storage,
    bus: Arc<TelemetryBus>,
    gazetteer: Arc<Gazetteer>,
    topics: Arc<TopicIndex>,
    registry: TaskRegistry,
    running: DashMap<i64, RunningTask>,
    pool: Arc<Semaphore>,
}

impl BackgroundTaskManager {
    #[must_use]
    pub fn new(
        storage: Storage,
        bus: Arc<TelemetryBus>,
        gazetteer: Arc<Gazetteer>,
        topics: Arc<TopicIndex>,
        registry: TaskRegistry,
        pool_size: usize,
    ) -> Self {
        Self {
            storage,
            bus,
            gazetteer,
            topics,
            registry,
            running: DashMap::new(),
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Rehydrate after a restart: every `running` row becomes `paused`.
    pub async fn rehydrate(&self) -> Result<Vec<i64>> {
        let ids = self.storage.rehydrate_running_tasks().await?;
        for id in &ids {
            log::info!("task {id} rehydrated to paused after restart");
        }
        Ok(ids)
    }

    /// Create a task row; validates the kind against the registry
    pub async fn create(&self, kind: &str, params: serde_json::Value) -> Result<i64> {
        self.registry.get(kind)?;
        self.storage.create_task(kind, &params).await
    }

    /// Start a created task or resume a paused one
    pub async fn start(&self, task_id: i64) -> Result<()> {
        let row = self.storage.get_task(task_id).await?;
        match row.status {
            TaskStatus::Created | TaskStatus::Paused => {}
            other => {
                return Err(CrawlError::precondition(
                    "task-not-startable",
                    format!("task {task_id} is {}", other.as_str()),
                ));
            }
        }
        if self.running.contains_key(&task_id) {
            return Err(CrawlError::precondition(
                "task-running",
                format!("task {task_id} is already running"),
            ));
        }

        let job = self.registry.get(&row.kind)?;
        let (signal_tx, signal_rx) = watch::channel(TaskSignal::Run);

        self.storage.set_task_status(task_id, TaskStatus::Running).await?;

        let ctx = TaskContext::new(
            self.storage.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.gazetteer),
            Arc::clone(&self.topics),
            task_id,
            row.params,
            row.progress,
            signal_rx,
        );
        let storage = self.storage.clone();
        let bus = Arc::clone(&self.bus);
        let pool = Arc::clone(&self.pool);
        let final_signal = signal_tx.clone();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = pool.acquire().await else {
                log::error!("task pool semaphore closed");
                return;
            };
            let result = job.execute(&ctx).await;
            let signal = *final_signal.borrow();
            let status = match (&result, signal) {
                (Ok(()), TaskSignal::Run) => TaskStatus::Completed,
                (Ok(()), TaskSignal::Pause) => TaskStatus::Paused,
                (Ok(()), TaskSignal::Stop) => TaskStatus::Stopped,
                (Err(_), _) => TaskStatus::Failed,
            };
            if let Err(e) = &result {
                bus.publish(TelemetryEvent::problem(
                    None,
                    ProblemSeverity::Critical,
                    e.code(),
                    format!("task {task_id} failed: {e}"),
                    None,
                ));
            }
            if let Err(e) = storage.set_task_status(task_id, status).await {
                log::error!("failed to persist task {task_id} status: {e}");
            }
            bus.publish(TelemetryEvent::milestone(
                None,
                format!("task-{}", status.as_str()),
                serde_json::json!({ "task_id": task_id }),
            ));
        });

        self.running.insert(
            task_id,
            RunningTask {
                signal: signal_tx,
                handle,
            },
        );
        Ok(())
    }

    /// Pause a running task; it persists its cursor and exits
    pub async fn pause(&self, task_id: i64) -> Result<()> {
        self.signal(task_id, TaskSignal::Pause).await
    }

    /// Resume a paused task; identical to `start`, the cursor does the rest
    pub async fn resume(&self, task_id: i64) -> Result<()> {
        self.start(task_id).await
    }

    /// Stop a task for good
    pub async fn stop(&self, task_id: i64) -> Result<()> {
        self.signal(task_id, TaskSignal::Stop).await
    }

    async fn signal(&self, task_id: i64, signal: TaskSignal) -> Result<()> {
        let Some((_, running)) = self.running.remove(&task_id) else {
            return Err(CrawlError::precondition(
                "task-not-running",
                format!("task {task_id} is not running"),
            ));
        };
        let _ = running.signal.send(signal);
        if let Err(e) = running.handle.await {
            log::error!("task {task_id} panicked: {e}");
            self.storage.set_task_status(task_id, TaskStatus::Failed).await?;
        }
        Ok(())
    }

    /// Wait for a running task to finish on its own
    pub async fn join(&self, task_id: i64) -> Result<()> {
        let Some((_, running)) = self.running.remove(&task_id) else {
            return Ok(());
        };
        if let Err(e) = running.handle.await {
            log::error!("task {task_id} panicked: {e}");
            self.storage.set_task_status(task_id, TaskStatus::Failed).await?;
        }
        Ok(())
    }

    /// Registered kind names
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.registry.kinds()
    }
}
