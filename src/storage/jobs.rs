//! Crawl job rows, queue events and milestones

use sqlx::Row;

use super::Storage;
use crate::error::{CrawlError, Result};
use crate::urlstore::UrlId;

/// Lifecycle states of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Preparing,
    Planning,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "planning" => Ok(Self::Planning),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CrawlError::Internal(format!("unknown job status {other:?}"))),
        }
    }

    /// A job in this state still has work to do or resume
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Planning | Self::Running | Self::Paused
        )
    }
}

/// One observation of one URL in the context of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Discovered,
    Enqueued,
    Visited,
    Saved,
    Skipped,
    Failed,
}

impl QueueAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Enqueued => "enqueued",
            Self::Visited => "visited",
            Self::Saved => "saved",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "enqueued" => Ok(Self::Enqueued),
            "visited" => Ok(Self::Visited),
            "saved" => Ok(Self::Saved),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(CrawlError::Internal(format!("unknown queue action {other:?}"))),
        }
    }

    /// Actions that settle a URL: it is no longer pending after one of these
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Visited | Self::Saved | Self::Skipped | Self::Failed)
    }
}

/// A persisted crawl job
#[derive(Debug, Clone)]
pub struct CrawlJobRow {
    pub id: i64,
    pub url_id: UrlId,
    pub status: JobStatus,
    pub plan_id: Option<i64>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub end_reason: Option<String>,
    pub args: serde_json::Value,
}

/// A persisted queue event
#[derive(Debug, Clone)]
pub struct QueueEventRow {
    pub id: i64,
    pub job_id: i64,
    pub action: QueueAction,
    pub url_id: UrlId,
    pub depth: u32,
    pub ts: i64,
}

impl Storage {
    /// Create a job in `preparing` state
    pub async fn create_job(&self, seed: UrlId, args: &serde_json::Value) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO crawl_jobs (url_id, status, args) VALUES (?1, 'preparing', ?2) RETURNING id",
        )
        .bind(seed.0)
        .bind(args.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Transition a job's status; stamps start/end times as appropriate
    pub async fn set_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        end_reason: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        match status {
            JobStatus::Running => {
                sqlx::query(
                    "UPDATE crawl_jobs
                     SET status = ?1, started_at = COALESCE(started_at, ?2)
                     WHERE id = ?3",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(job_id)
                .execute(self.pool())
                .await?;
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                sqlx::query(
                    "UPDATE crawl_jobs SET status = ?1, ended_at = ?2, end_reason = ?3 WHERE id = ?4",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(end_reason)
                .bind(job_id)
                .execute(self.pool())
                .await?;
            }
            _ => {
                sqlx::query("UPDATE crawl_jobs SET status = ?1 WHERE id = ?2")
                    .bind(status.as_str())
                    .bind(job_id)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    /// Attach the confirmed plan that seeded this job
    pub async fn set_job_plan(&self, job_id: i64, plan_id: i64) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET plan_id = ?1 WHERE id = ?2")
            .bind(plan_id)
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Fetch one job
    pub async fn get_job(&self, job_id: i64) -> Result<CrawlJobRow> {
        let row = sqlx::query(
            "SELECT id, url_id, status, plan_id, started_at, ended_at, end_reason, args
             FROM crawl_jobs WHERE id = ?1",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| CrawlError::InvalidInput(format!("unknown job {job_id}")))?;
        job_from_row(&row)
    }

    /// Jobs whose status is preparing/planning/running/paused
    pub async fn get_incomplete_jobs(&self) -> Result<Vec<CrawlJobRow>> {
        let rows = sqlx::query(
            "SELECT id, url_id, status, plan_id, started_at, ended_at, end_reason, args
             FROM crawl_jobs
             WHERE status IN ('preparing','planning','running','paused')
             ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Append a queue event
    pub async fn log_queue_event(
        &self,
        job_id: i64,
        action: QueueAction,
        url_id: UrlId,
        depth: u32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_events (job_id, action, url_id, depth, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(job_id)
        .bind(action.as_str())
        .bind(url_id.0)
        .bind(depth as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All queue events of a job in append order
    pub async fn queue_events(&self, job_id: i64) -> Result<Vec<QueueEventRow>> {
        let rows = sqlx::query(
            "SELECT id, job_id, action, url_id, depth, ts FROM queue_events WHERE job_id = ?1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| {
                Ok(QueueEventRow {
                    id: r.get(0),
                    job_id: r.get(1),
                    action: QueueAction::parse(&r.get::<String, _>(2))?,
                    url_id: UrlId(r.get(3)),
                    depth: r.get::<i64, _>(4) as u32,
                    ts: r.get(5),
                })
            })
            .collect()
    }

    /// Count events of one action kind for a job
    pub async fn count_queue_events(&self, job_id: i64, action: QueueAction) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM queue_events WHERE job_id = ?1 AND action = ?2")
            .bind(job_id)
            .bind(action.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    /// Persist a milestone
    pub async fn put_milestone(
        &self,
        job_id: Option<i64>,
        kind: &str,
        details: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query("INSERT INTO milestones (job_id, kind, ts, details) VALUES (?1, ?2, ?3, ?4)")
            .bind(job_id)
            .bind(kind)
            .bind(chrono::Utc::now().timestamp())
            .bind(details.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CrawlJobRow> {
    Ok(CrawlJobRow {
        id: row.get(0),
        url_id: UrlId(row.get(1)),
        status: JobStatus::parse(&row.get::<String, _>(2))?,
        plan_id: row.get(3),
        started_at: row.get(4),
        ended_at: row.get(5),
        end_reason: row.get(6),
        args: serde_json::from_str(&row.get::<String, _>(7)).unwrap_or(serde_json::Value::Null),
    })
}
