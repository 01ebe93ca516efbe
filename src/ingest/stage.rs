//! Stage and ingestor contracts
//!
//! An ingestion crawl is an ordered list of stages, each holding one or
//! more ingestors that run sequentially. Shared behaviour lives in
//! helper utilities, not in a base type: an ingestor is just the
//! `execute` capability.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::cache::HttpCache;
use crate::error::Result;
use crate::events::{ProgressUpdate, TelemetryBus, TelemetryEvent};
use crate::fetch::Fetcher;
use crate::storage::Storage;

/// What a stage ingests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Country,
    Region,
    City,
    Boundary,
}

impl StageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Region => "region",
            Self::City => "city",
            Self::Boundary => "boundary",
        }
    }
}

/// Counts reported by one ingestor run
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub written: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl IngestSummary {
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            written: self.written + other.written,
            updated: self.updated + other.updated,
            skipped: self.skipped + other.skipped,
        }
    }

    #[must_use]
    pub fn to_json(self) -> serde_json::Value {
        serde_json::json!({
            "written": self.written,
            "updated": self.updated,
            "skipped": self.skipped,
        })
    }
}

/// Execution context handed to every ingestor
pub struct IngestContext {
    pub storage: Storage,
    pub cache: Arc<HttpCache>,
    pub fetcher: Arc<dyn Fetcher>,
    pub bus: Arc<TelemetryBus>,
    pub cancel: watch::Receiver<bool>,
    pub force: bool,
}

impl IngestContext {
    /// Cooperative cancellation check
    #[must_use]
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Emit a progress event on the shared bus
    pub fn emit_progress(&self, phase: &str, current: u64, total: Option<u64>) {
        self.bus.publish(TelemetryEvent::progress(
            None,
            ProgressUpdate::new(current, total, phase),
        ));
    }
}

/// One structured data loader. Implementations must be idempotent with
/// respect to completed ingestion runs and their own writes.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Stable source identifier (`restcountries`, `osm-boundaries`, ...)
    fn source(&self) -> &'static str;
    /// Version of the upstream dataset this ingestor targets
    fn source_version(&self) -> &'static str;
    /// Load the source into the gazetteer
    async fn execute(&self, ctx: &IngestContext) -> Result<IngestSummary>;
}

/// A declared stage: its ingestors run in order, and the whole stage is
/// skipped when its `crawl_depth` exceeds the configured maximum.
pub struct StageSpec {
    pub name: &'static str,
    pub kind: StageKind,
    pub crawl_depth: u32,
    pub priority: i32,
    pub ingestors: Vec<Box<dyn Ingestor>>,
}
