pub mod analyzer;
pub mod cache;
pub mod config;
pub mod crawl;
pub mod error;
pub mod events;
pub mod fetch;
pub mod gazetteer;
pub mod ingest;
pub mod pacer;
pub mod planner;
pub mod queue;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod urlstore;

pub use analyzer::{analyze, AnalyzerInput, ContentAnalysis, PageKind};
pub use cache::{CacheKey, CacheLookup, CacheSubtype, HttpCache};
pub use config::{CrawlOptions, CrawlOptionsBuilder, CrawlType, FetchPolicy};
pub use crawl::{CrawlController, EngineShared, HostScores};
pub use error::CrawlError;
pub use events::{TelemetryBus, TelemetryEvent};
pub use fetch::{FetchPipeline, Fetcher, FetchedResponse, HttpFetcher};
pub use gazetteer::{Gazetteer, TopicIndex};
pub use ingest::{StagedCoordinator, Ingestor};
pub use pacer::{HostPacer, PaceOutcome, RobotsGate};
pub use planner::{Plan, PlanStep, Planner, SessionManager};
pub use queue::{FrontierQueue, PendingRequest, RequestSource};
pub use service::{CrawlEngine, IncompleteCrawl, PlanHandle};
pub use storage::{CompressionPreset, ContentRef, JobStatus, QueueAction, Storage};
pub use tasks::{BackgroundJob, BackgroundTaskManager, TaskRegistry};
pub use urlstore::{canonicalize, CanonicalPolicy, UrlId, UrlStore};
