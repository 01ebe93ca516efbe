//! Background task rows and ingestion run records

use sqlx::Row;

use super::Storage;
use crate::error::{CrawlError, Result};

/// Lifecycle states of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(CrawlError::Internal(format!("unknown task status {other:?}"))),
        }
    }
}

/// A persisted background task
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub kind: String,
    pub status: TaskStatus,
    pub progress: serde_json::Value,
    pub params: serde_json::Value,
    pub started_at: Option<i64>,
    pub paused_at: Option<i64>,
}

/// A persisted ingestion run
#[derive(Debug, Clone)]
pub struct IngestionRunRow {
    pub id: i64,
    pub source: String,
    pub source_version: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub status: String,
    pub stats: serde_json::Value,
}

impl Storage {
    /// Create a background task row in `created` state
    pub async fn create_task(&self, kind: &str, params: &serde_json::Value) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO background_tasks (kind, status, params, created_at)
             VALUES (?1, 'created', ?2, ?3) RETURNING id",
        )
        .bind(kind)
        .bind(params.to_string())
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Transition a task's status, stamping start/pause times
    pub async fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        match status {
            TaskStatus::Running => {
                sqlx::query(
                    "UPDATE background_tasks
                     SET status = 'running', started_at = COALESCE(started_at, ?1), paused_at = NULL
                     WHERE id = ?2",
                )
                .bind(now)
                .bind(task_id)
                .execute(self.pool())
                .await?;
            }
            TaskStatus::Paused => {
                sqlx::query(
                    "UPDATE background_tasks SET status = 'paused', paused_at = ?1 WHERE id = ?2",
                )
                .bind(now)
                .bind(task_id)
                .execute(self.pool())
                .await?;
            }
            _ => {
                sqlx::query("UPDATE background_tasks SET status = ?1 WHERE id = ?2")
                    .bind(status.as_str())
                    .bind(task_id)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist a task's progress cursor
    pub async fn set_task_progress(&self, task_id: i64, progress: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE background_tasks SET progress = ?1 WHERE id = ?2")
            .bind(progress.to_string())
            .bind(task_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Fetch a task row
    pub async fn get_task(&self, task_id: i64) -> Result<TaskRow> {
        let row = sqlx::query(
            "SELECT id, kind, status, progress, params, started_at, paused_at
             FROM background_tasks WHERE id = ?1",
        )
        .bind(task_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| CrawlError::InvalidInput(format!("unknown task {task_id}")))?;
        task_from_row(&row)
    }

    /// All tasks currently marked `running`; rehydrated to `paused` on restart
    pub async fn rehydrate_running_tasks(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM background_tasks WHERE status = 'running'")
            .fetch_all(self.pool())
            .await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.get(0)).collect();
        for id in &ids {
            self.set_task_status(*id, TaskStatus::Paused).await?;
        }
        Ok(ids)
    }

    /// Start an ingestion run.
    ///
    /// The run record doubles as an advisory lock: a previous run of the
    /// same `(source, version)` still marked `running` fails fast; a
    /// completed one is refused unless `force` is set.
    pub async fn start_ingestion_run(
        &self,
        source: &str,
        source_version: &str,
        force: bool,
    ) -> Result<i64> {
        let latest = sqlx::query(
            "SELECT id, status FROM ingestion_runs
             WHERE source = ?1 AND source_version = ?2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(source)
        .bind(source_version)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = latest {
            let status: String = row.get(1);
            match status.as_str() {
                "running" => {
                    return Err(CrawlError::precondition(
                        "ingestion-running",
                        format!("{source} {source_version} already has a run in progress"),
                    ));
                }
                "completed" if !force => {
                    return Err(CrawlError::precondition(
                        "already-completed",
                        format!("{source} {source_version} already ingested; pass force to re-run"),
                    ));
                }
                _ => {}
            }
        }

        let row = sqlx::query(
            "INSERT INTO ingestion_runs (source, source_version, started_at, status)
             VALUES (?1, ?2, ?3, 'running') RETURNING id",
        )
        .bind(source)
        .bind(source_version)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Mark an ingestion run finished
    pub async fn complete_ingestion_run(
        &self,
        run_id: i64,
        status: &str,
        stats: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_runs SET completed_at = ?1, status = ?2, stats = ?3 WHERE id = ?4",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(status)
        .bind(stats.to_string())
        .bind(run_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Whether a `(source, version)` has a completed run
    pub async fn check_completed_run(&self, source: &str, source_version: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM ingestion_runs
             WHERE source = ?1 AND source_version = ?2 AND status = 'completed'",
        )
        .bind(source)
        .bind(source_version)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0) > 0)
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0),
        kind: row.get(1),
        status: TaskStatus::parse(&row.get::<String, _>(2))?,
        progress: serde_json::from_str(&row.get::<String, _>(3)).unwrap_or(serde_json::Value::Null),
        params: serde_json::from_str(&row.get::<String, _>(4)).unwrap_or(serde_json::Value::Null),
        started_at: row.get(5),
        paused_at: row.get(6),
    })
}
