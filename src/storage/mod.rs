//! Persistent storage layer over SQLite
//!
//! Every entity the engine persists goes through this module: URLs,
//! HTTP responses, compressed content, analyses, links, crawl jobs,
//! queue events, milestones, gazetteer places, ingestion runs, plans
//! and background tasks. No other component touches the database.
//!
//! Uses WAL mode for concurrent reads during writes and a small pool;
//! schema creation is idempotent.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

use crate::error::Result;

pub mod content;
pub mod jobs;
pub mod pages;
pub mod places;
pub mod plans;
pub mod tasks;

pub use content::{CompressionPreset, ContentRef, StoredContent};
pub use jobs::{CrawlJobRow, JobStatus, QueueAction, QueueEventRow};
pub use pages::HttpResponseRow;
pub use places::{NameKind, PlaceKind, PlaceRow, PlaceUpsert};
pub use plans::{PlanOutcomeRow, PlanRow};
pub use tasks::{IngestionRunRow, TaskRow, TaskStatus};

/// SQL schema for the engine database
const SCHEMA_SQL: &str = r#"
-- Interned URLs: the only place URL strings live
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_urls_host ON urls(host);

-- HTTP responses; the latest row per URL drives freshness decisions
CREATE TABLE IF NOT EXISTS http_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    status INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    headers TEXT NOT NULL,
    content_ref INTEGER,
    elapsed_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_responses_url ON http_responses(url_id, fetched_at DESC);

-- Content bodies: inline rows, bucketed blobs, or spill files
CREATE TABLE IF NOT EXISTS content_store (
    content_ref INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_type TEXT NOT NULL CHECK (storage_type IN ('inline','bucket','file')),
    compression TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    uncompressed_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    blob BLOB,
    file_path TEXT
);
CREATE TABLE IF NOT EXISTS content_buckets (
    content_ref INTEGER PRIMARY KEY REFERENCES content_store(content_ref) ON DELETE CASCADE,
    blob BLOB NOT NULL
);

-- Analyzer output per content body
CREATE TABLE IF NOT EXISTS content_analysis (
    content_ref INTEGER PRIMARY KEY REFERENCES content_store(content_ref),
    classification TEXT NOT NULL,
    title TEXT,
    published_date TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    nav_link_count INTEGER NOT NULL DEFAULT 0,
    article_link_count INTEGER NOT NULL DEFAULT 0,
    place_ids TEXT NOT NULL DEFAULT '[]',
    topic_ids TEXT NOT NULL DEFAULT '[]',
    signals TEXT
);

-- Directed link graph
CREATE TABLE IF NOT EXISTS links (
    src_url_id INTEGER NOT NULL REFERENCES urls(id),
    dst_url_id INTEGER NOT NULL REFERENCES urls(id),
    anchor TEXT,
    rel TEXT,
    discovered_at INTEGER NOT NULL,
    PRIMARY KEY (src_url_id, dst_url_id)
);
CREATE INDEX IF NOT EXISTS idx_links_dst ON links(dst_url_id);

-- Crawl jobs; queues are internal to a job, never addressable
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    status TEXT NOT NULL,
    plan_id INTEGER,
    started_at INTEGER,
    ended_at INTEGER,
    end_reason TEXT,
    args TEXT NOT NULL DEFAULT '{}'
);

-- Append-only queue observations; source of truth for resumption
CREATE TABLE IF NOT EXISTS queue_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    depth INTEGER NOT NULL DEFAULT 0,
    ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_events_job ON queue_events(job_id, id);

CREATE TABLE IF NOT EXISTS milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER,
    kind TEXT NOT NULL,
    ts INTEGER NOT NULL,
    details TEXT NOT NULL DEFAULT '{}'
);

-- Gazetteer
CREATE TABLE IF NOT EXISTS places (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    canonical_name TEXT,
    country_code TEXT,
    admin_code TEXT,
    lat REAL,
    lng REAL,
    population INTEGER,
    extra TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_places_country ON places(country_code, kind);
CREATE TABLE IF NOT EXISTS place_names (
    place_id INTEGER NOT NULL REFERENCES places(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    lang TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL DEFAULT 'label',
    PRIMARY KEY (place_id, text, lang, kind)
);
CREATE INDEX IF NOT EXISTS idx_place_names_text ON place_names(text);
CREATE TABLE IF NOT EXISTS place_external_ids (
    place_id INTEGER NOT NULL REFERENCES places(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    ext_id TEXT NOT NULL,
    PRIMARY KEY (source, ext_id)
);
CREATE INDEX IF NOT EXISTS idx_place_ext_place ON place_external_ids(place_id);
-- relation participates in the key: a city may be capital_of several polities
CREATE TABLE IF NOT EXISTS place_hierarchy (
    parent_id INTEGER NOT NULL REFERENCES places(id) ON DELETE CASCADE,
    child_id INTEGER NOT NULL REFERENCES places(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    PRIMARY KEY (parent_id, child_id, relation)
);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    source_version TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    status TEXT NOT NULL,
    stats TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_ingestion_runs_source ON ingestion_runs(source, source_version, id);

-- Planner persistence
CREATE TABLE IF NOT EXISTS plans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    goal TEXT NOT NULL,
    steps TEXT NOT NULL,
    estimated_value REAL NOT NULL,
    estimated_cost REAL NOT NULL,
    probability REAL NOT NULL,
    lookahead INTEGER NOT NULL,
    branches_explored INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS plan_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id INTEGER NOT NULL REFERENCES plans(id),
    job_id INTEGER,
    steps_completed INTEGER NOT NULL,
    backtracks INTEGER NOT NULL,
    actual_value REAL NOT NULL,
    performance_ratio REAL NOT NULL,
    failure_reason TEXT,
    recorded_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS plan_step_results (
    plan_id INTEGER NOT NULL REFERENCES plans(id),
    step_index INTEGER NOT NULL,
    expected_value REAL NOT NULL,
    actual_value REAL NOT NULL,
    PRIMARY KEY (plan_id, step_index)
);
CREATE TABLE IF NOT EXISTS planning_heuristics (
    domain TEXT NOT NULL,
    signature TEXT NOT NULL,
    weight REAL NOT NULL,
    samples INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (domain, signature)
);

-- Background tasks survive process restarts
CREATE TABLE IF NOT EXISTS background_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    progress TEXT NOT NULL DEFAULT '{}',
    params TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    paused_at INTEGER
);
"#;

/// Storage handle; cheap to clone, shares the pool
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    /// Spill directory for content bodies above the bucket threshold
    content_dir: PathBuf,
}

impl Storage {
    /// Open (or create) the engine database under `data_dir`.
    ///
    /// The database lives at `{data_dir}/newswire.sqlite`; spill files go
    /// to `{data_dir}/content/`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| crate::error::CrawlError::Internal(format!("create data dir: {e}")))?;
        let content_dir = data_dir.join("content");
        tokio::fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| crate::error::CrawlError::Internal(format!("create content dir: {e}")))?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("newswire.sqlite"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool, content_dir })
    }

    /// In-memory database for tests
    pub async fn open_in_memory(content_dir: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        // A single connection keeps the :memory: database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self {
            pool,
            content_dir: content_dir.to_path_buf(),
        })
    }

    /// The underlying pool, shared with the URL store
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Spill directory for file-backed content
    #[must_use]
    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }
}
