//! Staged ingestion coordinator
//!
//! The second execution mode: ordered stages of sequential ingestors
//! (countries → regions → cities → boundaries) sharing the crawl
//! engine's cache, fetcher and telemetry bus. Completed `(source,
//! version)` runs suppress re-ingestion unless forced; a run still
//! marked `running` fails fast.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::{CacheKey, CacheLookup, HttpCache};
use crate::error::{CrawlError, Result};
use crate::events::{ProblemSeverity, TelemetryBus, TelemetryEvent};
use crate::fetch::{subtype_of, Fetcher};
use crate::storage::Storage;

pub mod boundaries;
pub mod cities;
pub mod countries;
pub mod dedup;
pub mod regions;
pub mod stage;

pub use boundaries::BoundariesIngestor;
pub use cities::CitiesIngestor;
pub use countries::CountriesIngestor;
pub use dedup::{capital_coords, upsert_place_deduped, PlaceRecord, UpsertResult, MULTI_CAPITALS};
pub use regions::RegionsIngestor;
pub use stage::{IngestContext, IngestSummary, Ingestor, StageKind, StageSpec};

/// Fetch a JSON document through the cache facade.
///
/// API responses are cached under their sub-type TTL so repeated runs
/// and forced re-ingestion stay cheap.
pub async fn fetch_json(ctx: &IngestContext, url: &str) -> Result<serde_json::Value> {
    let key = CacheKey::fingerprint("GET", url, &[]);
    if let CacheLookup::Hit(entry) = ctx.cache.lookup(key)? {
        return serde_json::from_slice(&entry.body)
            .map_err(|e| CrawlError::ParseFailure(format!("{url}: cached body: {e}")));
    }

    let response = ctx.fetcher.fetch(url).await?;
    if response.status != 200 {
        return Err(CrawlError::TransientNetwork(format!(
            "{url}: HTTP {}",
            response.status
        )));
    }
    let subtype = subtype_of(response.header("content-type"));
    ctx.cache.store(
        key,
        url,
        response.status,
        response.headers.clone(),
        &response.body,
        subtype,
    )?;
    serde_json::from_slice(&response.body)
        .map_err(|e| CrawlError::ParseFailure(format!("{url}: {e}")))
}

/// Summary of one completed stage
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub name: &'static str,
    pub summary: IngestSummary,
    pub skipped_completed: usize,
}

/// Runs stages in declared order, each ingestor sequentially.
///
/// Concurrency is interpreted as an upper bound; this coordinator uses
/// one lane, which is always within it.
pub struct StagedCoordinator {
    storage: Storage,
    cache: Arc<HttpCache>,
    fetcher: Arc<dyn Fetcher>,
    bus: Arc<TelemetryBus>,
    stages: Vec<StageSpec>,
    cancel: watch::Sender<bool>,
}

impl StagedCoordinator {
    #[must_use]
    pub fn new(
        storage: Storage,
        cache: Arc<HttpCache>,
        fetcher: Arc<dyn Fetcher>,
        bus: Arc<TelemetryBus>,
        stages: Vec<StageSpec>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            storage,
            cache,
            fetcher,
            bus,
            stages,
            cancel,
        }
    }

    /// Request cooperative cancellation of the running stage
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Execute all stages whose `crawl_depth` fits within `max_depth`.
    pub async fn run(&self, max_depth: u32, force: bool) -> Result<Vec<StageSummary>> {
        let mut summaries = Vec::new();

        for stage in &self.stages {
            if stage.crawl_depth > max_depth {
                log::info!(
                    "skipping stage {} (depth {} > max {})",
                    stage.name,
                    stage.crawl_depth,
                    max_depth
                );
                continue;
            }
            if *self.cancel.borrow() {
                break;
            }

            let mut stage_total = IngestSummary::default();
            let mut skipped_completed = 0;

            for ingestor in &stage.ingestors {
                let source = ingestor.source();
                let version = ingestor.source_version();

                if !force && self.storage.check_completed_run(source, version).await? {
                    log::info!("{source} {version} already ingested, skipping");
                    skipped_completed += 1;
                    continue;
                }

                // The run record is the advisory lock; a concurrent
                // `running` run makes this fail fast.
                let run_id = self.storage.start_ingestion_run(source, version, force).await?;

                let ctx = IngestContext {
                    storage: self.storage.clone(),
                    cache: Arc::clone(&self.cache),
                    fetcher: Arc::clone(&self.fetcher),
                    bus: Arc::clone(&self.bus),
                    cancel: self.cancel.subscribe(),
                    force,
                };

                match ingestor.execute(&ctx).await {
                    Ok(summary) => {
                        self.storage
                            .complete_ingestion_run(run_id, "completed", &summary.to_json())
                            .await?;
                        stage_total = stage_total.merged(summary);
                    }
                    Err(e) => {
                        self.storage
                            .complete_ingestion_run(
                                run_id,
                                "failed",
                                &serde_json::json!({ "error": e.to_string() }),
                            )
                            .await?;
                        self.bus.publish(TelemetryEvent::problem(
                            None,
                            ProblemSeverity::Critical,
                            e.code(),
                            format!("ingestor {source} failed: {e}"),
                            None,
                        ));
                        return Err(e);
                    }
                }
            }

            let details = serde_json::json!({
                "stage": stage.name,
                "kind": stage.kind.as_str(),
                "written": stage_total.written,
                "updated": stage_total.updated,
                "skipped": stage_total.skipped,
            });
            let milestone = format!("stage-complete:{}", stage.name);
            self.storage.put_milestone(None, &milestone, &details).await?;
            self.bus
                .publish(TelemetryEvent::milestone(None, milestone, details));
            if stage.kind == StageKind::Country {
                self.bus.publish(TelemetryEvent::milestone(
                    None,
                    "countries-complete",
                    serde_json::Value::Null,
                ));
            }

            summaries.push(StageSummary {
                name: stage.name,
                summary: stage_total,
                skipped_completed,
            });
        }

        Ok(summaries)
    }
}

/// Resolve a single ingestor by its source identifier
#[must_use]
pub fn ingestor_for_source(source: &str) -> Option<Box<dyn Ingestor>> {
    match source {
        "restcountries" => Some(Box::new(CountriesIngestor::default())),
        "wikidata-regions" => Some(Box::new(RegionsIngestor::default())),
        "geonames-cities" => Some(Box::new(CitiesIngestor::default())),
        "osm-boundaries" => Some(Box::new(BoundariesIngestor::default())),
        _ => None,
    }
}

/// The default geography pipeline: countries, then regions, then cities,
/// then boundaries, with increasing depth requirements.
#[must_use]
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            name: "countries",
            kind: StageKind::Country,
            crawl_depth: 0,
            priority: 100,
            ingestors: vec![Box::new(CountriesIngestor::default())],
        },
        StageSpec {
            name: "regions",
            kind: StageKind::Region,
            crawl_depth: 1,
            priority: 80,
            ingestors: vec![Box::new(RegionsIngestor::default())],
        },
        StageSpec {
            name: "cities",
            kind: StageKind::City,
            crawl_depth: 2,
            priority: 60,
            ingestors: vec![Box::new(CitiesIngestor::default())],
        },
        StageSpec {
            name: "boundaries",
            kind: StageKind::Boundary,
            crawl_depth: 3,
            priority: 40,
            ingestors: vec![Box::new(BoundariesIngestor::default())],
        },
    ]
}
