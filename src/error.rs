//! Error taxonomy shared across the crawl engine
//!
//! Every failure in the system maps onto one of these kinds. Control-surface
//! operations return `InvalidInput` / `PreconditionFailed` synchronously;
//! everything else is reported as a telemetry problem and either recovered
//! in-band or surfaced as a job-state transition.

use crate::events::ProblemSeverity;

/// Unified error type for the crawl engine
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Malformed caller input: bad URL, unknown crawl type, unknown session
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation is well-formed but the system state forbids it
    #[error("precondition failed [{code}]: {message}")]
    PreconditionFailed {
        code: &'static str,
        message: String,
    },

    /// Timeout, connection reset, HTTP 429/5xx; recovered by pacer backoff
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// Definitive HTTP failure (404, 410, ...); recorded, never retried
    #[error("permanent HTTP failure: status {status}")]
    PermanentHttp { status: u16 },

    /// Malformed HTML or JSON; the raw response is kept, analysis skipped
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Robots disallow or allow/deny list; recorded as skipped
    #[error("blocked by policy: {0}")]
    PolicyBlocked(String),

    /// Underlying store failed; retried once, then pauses the job
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A configured budget ceiling was reached; the crawl ends gracefully
    #[error("resource budget exhausted: {0}")]
    ResourceExhausted(String),

    /// Invariant violation; pauses the job and demands operator attention
    #[error("internal error: {0}")]
    Internal(String),
}

impl CrawlError {
    /// Stable machine-readable code for telemetry problem events
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid-input",
            Self::PreconditionFailed { code, .. } => code,
            Self::TransientNetwork(_) => "transient-network",
            Self::PermanentHttp { .. } => "permanent-http",
            Self::ParseFailure(_) => "parse-failure",
            Self::PolicyBlocked(_) => "policy-blocked",
            Self::Storage(_) => "storage-failure",
            Self::ResourceExhausted(_) => "budget-reached",
            Self::Internal(_) => "internal",
        }
    }

    /// Severity used when this error is converted to a problem event
    #[must_use]
    pub fn severity(&self) -> ProblemSeverity {
        match self {
            Self::TransientNetwork(_) | Self::PermanentHttp { .. } | Self::ParseFailure(_) => {
                ProblemSeverity::Info
            }
            Self::PolicyBlocked(_) => ProblemSeverity::Info,
            Self::InvalidInput(_)
            | Self::PreconditionFailed { .. }
            | Self::ResourceExhausted(_) => ProblemSeverity::Warning,
            Self::Storage(_) | Self::Internal(_) => ProblemSeverity::Critical,
        }
    }

    /// True if a worker may keep crawling after recording this error
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_)
                | Self::PermanentHttp { .. }
                | Self::ParseFailure(_)
                | Self::PolicyBlocked(_)
        )
    }

    /// Shortcut for `PreconditionFailed` with a stable code
    #[must_use]
    pub fn precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            code,
            message: message.into(),
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T, E = CrawlError> = std::result::Result<T, E>;
