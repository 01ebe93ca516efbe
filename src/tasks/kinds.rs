//! Built-in background task kinds
//!
//! Each kind is a capability object over existing data: compress
//! re-encodes stored bodies, analyse re-runs the classifier, export
//! dumps articles to JSONL, vacuum compacts the database. All are
//! cooperative: they check the signal between items and persist a
//! cursor so a resume never re-does finished sub-work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::Row;
use tokio::sync::watch;

use crate::analyzer::{self, AnalyzerInput};
use crate::error::{CrawlError, Result};
use crate::events::{ProgressUpdate, TelemetryBus, TelemetryEvent};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::storage::{CompressionPreset, ContentRef, Storage};

/// Signal delivered to a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    Run,
    Pause,
    Stop,
}

/// Progress persistence is rate-limited to this interval
const PERSIST_INTERVAL: Duration = Duration::from_millis(500);

/// Execution context for one task run
pub struct TaskContext {
    pub storage: Storage,
    pub bus: Arc<TelemetryBus>,
    pub gazetteer: Arc<Gazetteer>,
    pub topics: Arc<TopicIndex>,
    pub task_id: i64,
    pub params: serde_json::Value,
    /// Cursor persisted by the previous run, `null` on a fresh start
    pub cursor: serde_json::Value,
    pub signal: watch::Receiver<TaskSignal>,
    last_persist: Mutex<Instant>,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        storage: Storage,
        bus: Arc<TelemetryBus>,
        gazetteer: Arc<Gazetteer>,
        topics: Arc<TopicIndex>,
        task_id: i64,
        params: serde_json::Value,
        cursor: serde_json::Value,
        signal: watch::Receiver<TaskSignal>,
    ) -> Self {
        Self {
            storage,
            bus,
            gazetteer,
            topics,
            task_id,
            params,
            cursor,
            signal,
            last_persist: Mutex::new(Instant::now() - PERSIST_INTERVAL),
        }
    }

    /// True once a pause or stop has been requested
    #[must_use]
    pub fn cancelled(&self) -> bool {
        *self.signal.borrow() != TaskSignal::Run
    }

    /// Publish progress and persist it, rate-limited. `cursor` must be
    /// enough for the task to resume without repeating finished work.
    pub async fn emit_progress(
        &self,
        current: u64,
        total: Option<u64>,
        cursor: serde_json::Value,
    ) -> Result<()> {
        let progress = serde_json::json!({
            "current": current,
            "total": total,
            "percent": total.filter(|t| *t > 0).map(|t| current as f64 / t as f64 * 100.0),
            "cursor": cursor,
        });
        self.bus.publish(TelemetryEvent::progress(
            None,
            ProgressUpdate::new(current, total, "task").with_details(progress.clone()),
        ));

        let due = {
            let mut last = self.last_persist.lock();
            if last.elapsed() >= PERSIST_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due || self.cancelled() {
            self.storage.set_task_progress(self.task_id, &progress).await?;
        }
        Ok(())
    }

    /// Persist the final cursor unconditionally; called on exit paths
    pub async fn persist_cursor(&self, current: u64, cursor: serde_json::Value) -> Result<()> {
        let progress = serde_json::json!({ "current": current, "cursor": cursor });
        self.storage.set_task_progress(self.task_id, &progress).await
    }

    /// Cursor value stored by a previous run, if any
    #[must_use]
    pub fn resume_point(&self) -> i64 {
        self.cursor
            .pointer("/cursor/after")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    }
}

/// One background task kind
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    fn kind(&self) -> &'static str;
    /// Run to completion or until `ctx.cancelled()`. On cancellation the
    /// job persists its cursor and returns Ok; the manager decides the
    /// final status from the signal.
    async fn execute(&self, ctx: &TaskContext) -> Result<()>;
}

/// Explicit kind registry; new kinds register at process init
#[derive(Default)]
pub struct TaskRegistry {
    kinds: HashMap<&'static str, Arc<dyn BackgroundJob>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in kinds
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CompressJob));
        registry.register(Arc::new(AnalyseJob));
        registry.register(Arc::new(ExportJob));
        registry.register(Arc::new(VacuumJob));
        registry
    }

    pub fn register(&mut self, job: Arc<dyn BackgroundJob>) {
        self.kinds.insert(job.kind(), job);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn BackgroundJob>> {
        self.kinds
            .get(kind)
            .map(Arc::clone)
            .ok_or_else(|| CrawlError::InvalidInput(format!("unknown task kind {kind:?}")))
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.kinds.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Re-encode stored content bodies with a target preset
pub struct CompressJob;

#[async_trait]
impl BackgroundJob for CompressJob {
    fn kind(&self) -> &'static str {
        "compress"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let preset_name = ctx
            .params
            .get("preset")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("zstd-19");
        let preset = CompressionPreset::by_name(preset_name)?;

        let refs = ctx.storage.list_content_refs().await?;
        let total = refs.len() as u64;
        let resume_after = ctx.resume_point();
        let mut done = refs.iter().filter(|r| r.0 <= resume_after).count() as u64;

        for content_ref in refs.into_iter().filter(|r| r.0 > resume_after) {
            if ctx.cancelled() {
                ctx.persist_cursor(done, serde_json::json!({ "after": content_ref.0 - 1 }))
                    .await?;
                return Ok(());
            }
            ctx.storage.recompress_content(content_ref, preset).await?;
            done += 1;
            ctx.emit_progress(done, Some(total), serde_json::json!({ "after": content_ref.0 }))
                .await?;
        }
        ctx.persist_cursor(done, serde_json::json!({ "after": i64::MAX }))
            .await?;
        Ok(())
    }
}

/// Re-run the analyzer over every stored HTML response
pub struct AnalyseJob;

#[async_trait]
impl BackgroundJob for AnalyseJob {
    fn kind(&self) -> &'static str {
        "analyse"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let resume_after = ctx.resume_point();
        let rows = sqlx::query(
            "SELECT r.content_ref, u.canonical, r.status, r.headers
             FROM http_responses r JOIN urls u ON u.id = r.url_id
             WHERE r.content_ref IS NOT NULL AND r.content_ref > ?1
             ORDER BY r.content_ref",
        )
        .bind(resume_after)
        .fetch_all(ctx.storage.pool())
        .await?;

        let total = rows.len() as u64;
        let mut done = 0u64;
        for row in rows {
            if ctx.cancelled() {
                return Ok(());
            }
            let content_ref = ContentRef(row.get::<i64, _>(0));
            let url: String = row.get(1);
            let status = row.get::<i64, _>(2) as u16;
            let headers: Vec<(String, String)> =
                serde_json::from_str(&row.get::<String, _>(3)).unwrap_or_default();
            let content_type = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                .map(|(_, v)| v.clone());

            let Ok(content) = ctx.storage.get_content(content_ref).await else {
                continue;
            };
            let body = String::from_utf8_lossy(&content.bytes);
            let links = url::Url::parse(&url)
                .map(|base| analyzer::extract_links(&body, &base, true))
                .unwrap_or_default();
            let analysis = analyzer::analyze(&AnalyzerInput {
                url: &url,
                status,
                content_type: content_type.as_deref(),
                body: &body,
                links: &links,
                gazetteer: &ctx.gazetteer,
                topics: &ctx.topics,
            });
            ctx.storage
                .put_content_analysis(content_ref, &analysis, false)
                .await?;

            done += 1;
            ctx.emit_progress(done, Some(total), serde_json::json!({ "after": content_ref.0 }))
                .await?;
        }
        Ok(())
    }
}

/// Export analysed articles as JSON lines
pub struct ExportJob;

#[async_trait]
impl BackgroundJob for ExportJob {
    fn kind(&self) -> &'static str {
        "export"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let path = ctx
            .params
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CrawlError::InvalidInput("export task needs a path param".into()))?;

        let rows = sqlx::query(
            "SELECT a.content_ref, a.title, a.published_date, a.word_count, a.language, u.canonical
             FROM content_analysis a
             JOIN http_responses r ON r.content_ref = a.content_ref
             JOIN urls u ON u.id = r.url_id
             WHERE a.classification = 'article' AND a.content_ref > ?1
             ORDER BY a.content_ref",
        )
        .bind(ctx.resume_point())
        .fetch_all(ctx.storage.pool())
        .await?;

        let total = rows.len() as u64;
        let mut lines = String::new();
        let mut done = 0u64;
        let mut last_ref = ctx.resume_point();
        for row in rows {
            if ctx.cancelled() {
                break;
            }
            last_ref = row.get::<i64, _>(0);
            let record = serde_json::json!({
                "url": row.get::<String, _>(5),
                "title": row.get::<Option<String>, _>(1),
                "date": row.get::<Option<String>, _>(2),
                "word_count": row.get::<i64, _>(3),
                "language": row.get::<Option<String>, _>(4),
            });
            lines.push_str(&record.to_string());
            lines.push('\n');
            done += 1;
            if done % 100 == 0 {
                ctx.emit_progress(done, Some(total), serde_json::json!({ "after": last_ref }))
                    .await?;
            }
        }

        // Append so resumed exports extend the earlier file.
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CrawlError::Internal(format!("open export file {path:?}: {e}")))?;
        file.write_all(lines.as_bytes())
            .await
            .map_err(|e| CrawlError::Internal(format!("write export file: {e}")))?;

        ctx.persist_cursor(done, serde_json::json!({ "after": last_ref }))
            .await?;
        Ok(())
    }
}

/// Compact the underlying database
pub struct VacuumJob;

#[async_trait]
impl BackgroundJob for VacuumJob {
    fn kind(&self) -> &'static str {
        "vacuum"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        ctx.emit_progress(0, Some(1), serde_json::Value::Null).await?;
        sqlx::query("VACUUM").execute(ctx.storage.pool()).await?;
        ctx.emit_progress(1, Some(1), serde_json::Value::Null).await?;
        Ok(())
    }
}
