//! Event type definitions for the telemetry bus
//!
//! Every stage of the engine reports through these events: discrete
//! milestones, incremental progress, problems, and the planning session
//! lifecycle. All events share the optional job/session correlation IDs.

use serde::{Deserialize, Serialize};

/// Severity attached to problem events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemSeverity {
    Info,
    Warning,
    Critical,
}

/// Reason the bus is shutting down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShutdownReason {
    /// All owning components completed normally
    Completed,
    /// An unrecoverable error forced shutdown
    Error(String),
    /// Shutdown requested by the operator
    Cancelled,
}

/// Progress payload shared by crawls, ingestion stages and background tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current: u64,
    pub total: Option<u64>,
    pub percent: Option<f64>,
    pub phase: String,
    pub details: serde_json::Value,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(current: u64, total: Option<u64>, phase: impl Into<String>) -> Self {
        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (current as f64 / t as f64) * 100.0);
        Self {
            current,
            total,
            percent,
            phase: phase.into(),
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Lifecycle states reported for a planning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSessionStatus {
    Planning,
    Ready,
    Confirmed,
    Cancelled,
    Failed,
    Expired,
}

/// Events emitted on the telemetry bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// Discrete named achievement (`first-article`, `stage-complete:cities`, ...)
    Milestone {
        job_id: Option<i64>,
        session_id: Option<String>,
        name: String,
        details: serde_json::Value,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// Incremental progress on a crawl, stage or background task
    Progress {
        job_id: Option<i64>,
        session_id: Option<String>,
        update: ProgressUpdate,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// A recoverable or fatal problem observed anywhere in the engine
    Problem {
        job_id: Option<i64>,
        session_id: Option<String>,
        severity: ProblemSeverity,
        code: String,
        message: String,
        url_id: Option<i64>,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// Planner sub-stage update during a strategic search
    PlanStage {
        session_id: String,
        stage: String,
        detail: serde_json::Value,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// The finished blueprint for a planning session
    PlanPreview {
        session_id: String,
        blueprint: serde_json::Value,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// State transition of a planning session
    PlanStatus {
        session_id: String,
        status: PlanSessionStatus,
        ts: chrono::DateTime<chrono::Utc>,
    },
    /// Signals that the bus is shutting down; subscribers should exit
    Shutdown {
        reason: ShutdownReason,
        ts: chrono::DateTime<chrono::Utc>,
    },
}

impl TelemetryEvent {
    /// Create a milestone event
    #[must_use]
    pub fn milestone(job_id: Option<i64>, name: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Milestone {
            job_id,
            session_id: None,
            name: name.into(),
            details,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a progress event for a job
    #[must_use]
    pub fn progress(job_id: Option<i64>, update: ProgressUpdate) -> Self {
        Self::Progress {
            job_id,
            session_id: None,
            update,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a problem event
    #[must_use]
    pub fn problem(
        job_id: Option<i64>,
        severity: ProblemSeverity,
        code: impl Into<String>,
        message: impl Into<String>,
        url_id: Option<i64>,
    ) -> Self {
        Self::Problem {
            job_id,
            session_id: None,
            severity,
            code: code.into(),
            message: message.into(),
            url_id,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a planner sub-stage event
    #[must_use]
    pub fn plan_stage(session_id: impl Into<String>, stage: impl Into<String>, detail: serde_json::Value) -> Self {
        Self::PlanStage {
            session_id: session_id.into(),
            stage: stage.into(),
            detail,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a plan preview event carrying the blueprint
    #[must_use]
    pub fn plan_preview(session_id: impl Into<String>, blueprint: serde_json::Value) -> Self {
        Self::PlanPreview {
            session_id: session_id.into(),
            blueprint,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a plan status transition event
    #[must_use]
    pub fn plan_status(session_id: impl Into<String>, status: PlanSessionStatus) -> Self {
        Self::PlanStatus {
            session_id: session_id.into(),
            status,
            ts: chrono::Utc::now(),
        }
    }

    /// Create a shutdown event
    #[must_use]
    pub fn shutdown(reason: ShutdownReason) -> Self {
        Self::Shutdown {
            reason,
            ts: chrono::Utc::now(),
        }
    }

    /// Job this event belongs to, if any
    #[must_use]
    pub fn job_id(&self) -> Option<i64> {
        match self {
            Self::Milestone { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Problem { job_id, .. } => *job_id,
            _ => None,
        }
    }
}
