//! Unified telemetry: event types, fan-out bus and bus metrics
//!
//! Crawl workers, the planner, ingestion stages and background tasks all
//! report through one `TelemetryBus`. Persistence of milestones and
//! problems is a subscriber concern, not a publisher concern.

pub mod bus;
pub mod metrics;
pub mod types;

pub use bus::TelemetryBus;
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use types::{
    PlanSessionStatus, ProblemSeverity, ProgressUpdate, ShutdownReason, TelemetryEvent,
};
