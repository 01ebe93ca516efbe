//! The fetch-and-classify pipeline
//!
//! For one pending request: cache policy → (network) → persistence →
//! analysis → link extraction → re-enqueue of discoveries. Every path
//! out of the pipeline logs exactly one settling queue event, keeping
//! queue events and HTTP-response rows in parity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use crate::analyzer::{self, AnalyzerInput, ContentAnalysis, ExtractedLink};
use crate::cache::{CacheKey, CacheLookup, CacheSubtype, HttpCache};
use crate::config::{CrawlOptions, FetchPolicy};
use crate::crawl::priority::{compute_priority, HostScores};
use crate::error::{CrawlError, Result};
use crate::events::{ProblemSeverity, TelemetryBus, TelemetryEvent};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::pacer::{HostPacer, PaceOutcome, RobotsGate};
use crate::queue::{FrontierQueue, PendingRequest, RequestSource};
use crate::storage::{QueueAction, Storage};
use crate::urlstore::UrlStore;

pub mod client;

pub use client::{Fetcher, FetchedResponse, HttpFetcher};

/// Network attempts per request before the URL is marked failed
const MAX_ATTEMPTS: u32 = 2;

/// How one request was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDisposition {
    FetchedNetwork,
    ServedFromCache,
    /// Stale cache entry served after a network failure
    ServedStale,
    /// Policy or cache-only miss; nothing was fetched
    Skipped { reason: String },
    /// Permanent failure recorded for this URL
    Failed { code: String },
}

/// What the worker gets back for one processed request
#[derive(Debug)]
pub struct ProcessReport {
    pub disposition: FetchDisposition,
    pub analysis: Option<ContentAnalysis>,
    pub links_discovered: usize,
    pub links_enqueued: usize,
}

/// Shared, immutable wiring for the pipeline of one crawl job
pub struct FetchPipeline {
    pub storage: Storage,
    pub urlstore: Arc<UrlStore>,
    pub cache: Arc<HttpCache>,
    pub robots: Arc<RobotsGate>,
    pub fetcher: Arc<dyn Fetcher>,
    pub bus: Arc<TelemetryBus>,
    pub gazetteer: Arc<Gazetteer>,
    pub topics: Arc<TopicIndex>,
    pub options: Arc<CrawlOptions>,
    pub host_scores: Arc<HostScores>,
    articles_seen: AtomicU64,
}

impl FetchPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        storage: Storage,
        urlstore: Arc<UrlStore>,
        cache: Arc<HttpCache>,
        robots: Arc<RobotsGate>,
        fetcher: Arc<dyn Fetcher>,
        bus: Arc<TelemetryBus>,
        gazetteer: Arc<Gazetteer>,
        topics: Arc<TopicIndex>,
        options: Arc<CrawlOptions>,
        host_scores: Arc<HostScores>,
    ) -> Self {
        Self {
            storage,
            urlstore,
            cache,
            robots,
            fetcher,
            bus,
            gazetteer,
            topics,
            options,
            host_scores,
            articles_seen: AtomicU64::new(0),
        }
    }

    /// Process one dequeued request end to end.
    pub async fn process(
        &self,
        req: &PendingRequest,
        queue: &FrontierQueue,
        pacer: &HostPacer,
    ) -> Result<ProcessReport> {
        let url = self.urlstore.resolve(req.url_id).await?;

        // Crawl policy gates: allow/deny lists, then robots.
        if !self.options.url_permitted(&url) {
            return self.settle_skipped(req, "deny-list").await;
        }
        match self.robots.allowed(&url, self.fetcher.as_ref()).await {
            Ok(true) => {}
            Ok(false) => return self.settle_skipped(req, "robots-disallow").await,
            Err(e) => {
                log::debug!("robots evaluation failed for {url}: {e}");
            }
        }

        let key = CacheKey::fingerprint("GET", &url, &[]);
        let policy = self.options.cache_policy;

        // Cache consultation per policy.
        let cached = if policy == FetchPolicy::NetworkOnly {
            CacheLookup::Miss
        } else {
            self.cache.lookup(key)?
        };

        if let CacheLookup::Hit(entry) = &cached {
            let fresh_enough = self
                .options
                .max_cache_age_ms
                .map_or(true, |age_ms| {
                    entry.age(std::time::Instant::now()).as_millis() as u64 <= age_ms
                });
            if fresh_enough && matches!(policy, FetchPolicy::PreferCache | FetchPolicy::CacheOnly) {
                return self
                    .adopt_cached(req, queue, &url, entry.status, &entry.headers, &entry.body, false)
                    .await;
            }
        }

        if policy == FetchPolicy::CacheOnly {
            // No usable entry and the network is off limits.
            return self.settle_skipped(req, "cache-miss").await;
        }

        // Network path, paced and retried once on transient failure.
        let mut last_transient: Option<CrawlError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            let lease = pacer.scoped_lease(&req.host).await;
            match self.fetcher.fetch(&url).await {
                Ok(response) if matches!(response.status, 429 | 503) => {
                    lease.complete(PaceOutcome::Throttled {
                        retry_after: response.retry_after(),
                    });
                    last_transient = Some(CrawlError::TransientNetwork(format!(
                        "{url}: HTTP {}",
                        response.status
                    )));
                }
                Ok(response) if response.status >= 500 => {
                    lease.complete(PaceOutcome::Throttled { retry_after: None });
                    last_transient = Some(CrawlError::TransientNetwork(format!(
                        "{url}: HTTP {}",
                        response.status
                    )));
                }
                Ok(response) => {
                    lease.complete(PaceOutcome::Success);
                    return self.persist_and_analyse(req, queue, &url, response, key).await;
                }
                Err(e) => {
                    lease.complete(PaceOutcome::Throttled { retry_after: None });
                    last_transient = Some(e);
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                log::debug!("transient failure on {url}, retrying");
            }
        }

        // Transient failures exhausted: optionally serve stale.
        if self.options.fallback_to_cache {
            if let CacheLookup::Hit(entry) | CacheLookup::Expired(entry) = cached {
                self.bus.publish(TelemetryEvent::problem(
                    Some(req.job_id),
                    ProblemSeverity::Info,
                    "served-stale",
                    format!("network failed for {url}, serving stale cache"),
                    Some(req.url_id.0),
                ));
                return self
                    .adopt_cached(req, queue, &url, entry.status, &entry.headers, &entry.body, true)
                    .await;
            }
        }

        let err = last_transient
            .unwrap_or_else(|| CrawlError::TransientNetwork(format!("{url}: unknown failure")));
        self.settle_failed(req, &err).await
    }

    /// Adopt a cached body: analysis and link flow run, but no network and
    /// no duplicate response row.
    #[allow(clippy::too_many_arguments)]
    async fn adopt_cached(
        &self,
        req: &PendingRequest,
        queue: &FrontierQueue,
        url: &str,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
        stale: bool,
    ) -> Result<ProcessReport> {
        // Parity: a visited event needs a response row behind it. Cache
        // entries normally descend from a persisted fetch; if not (warm
        // cache, fresh database), persist one now.
        if self.storage.latest_response(req.url_id).await?.is_none() {
            let subtype = subtype_of(header_value(headers, "content-type"));
            let preset = self.options.preset_for(subtype.as_str())?;
            let content_ref = self.storage.put_content(body.to_vec(), preset).await?;
            self.storage
                .put_http_response(req.url_id, status, headers, Some(content_ref), 0)
                .await?;
        }

        let report = self
            .analyse_and_discover(req, queue, url, status, headers, body)
            .await?;
        self.storage
            .log_queue_event(req.job_id, QueueAction::Visited, req.url_id, req.depth)
            .await?;
        Ok(ProcessReport {
            disposition: if stale {
                FetchDisposition::ServedStale
            } else {
                FetchDisposition::ServedFromCache
            },
            ..report
        })
    }

    /// Persist a network response, then run analysis and discovery
    async fn persist_and_analyse(
        &self,
        req: &PendingRequest,
        queue: &FrontierQueue,
        url: &str,
        response: FetchedResponse,
        key: CacheKey,
    ) -> Result<ProcessReport> {
        // 4xx (except 429, handled upstream): record, never retry.
        if response.status >= 400 {
            self.storage
                .put_http_response(req.url_id, response.status, &response.headers, None, response.elapsed_ms)
                .await?;
            self.storage
                .log_queue_event(req.job_id, QueueAction::Failed, req.url_id, req.depth)
                .await?;
            self.bus.publish(TelemetryEvent::problem(
                Some(req.job_id),
                ProblemSeverity::Info,
                "permanent-http",
                format!("{url}: HTTP {}", response.status),
                Some(req.url_id.0),
            ));
            return Ok(ProcessReport {
                disposition: FetchDisposition::Failed {
                    code: format!("http-{}", response.status),
                },
                analysis: None,
                links_discovered: 0,
                links_enqueued: 0,
            });
        }

        let subtype = subtype_of(response.header("content-type"));
        let preset = self.options.preset_for(subtype.as_str())?;
        let content_ref = self
            .storage
            .put_content(response.body.clone(), preset)
            .await?;
        self.storage
            .put_http_response(
                req.url_id,
                response.status,
                &response.headers,
                Some(content_ref),
                response.elapsed_ms,
            )
            .await?;

        self.cache.store(
            key,
            url,
            response.status,
            response.headers.clone(),
            &response.body,
            subtype,
        )?;

        let mut report = self
            .analyse_and_discover(req, queue, url, response.status, &response.headers, &response.body)
            .await?;

        if let Some(analysis) = &report.analysis {
            let persist_signals = self.options.hub_freshness.persist_decision_traces;
            self.storage
                .put_content_analysis(content_ref, analysis, persist_signals)
                .await?;
        }

        // A persisted body settles as saved, not merely visited.
        self.storage
            .log_queue_event(req.job_id, QueueAction::Saved, req.url_id, req.depth)
            .await?;
        report.disposition = FetchDisposition::FetchedNetwork;
        Ok(report)
    }

    /// Analysis, milestone accounting, link persistence and re-enqueue
    async fn analyse_and_discover(
        &self,
        req: &PendingRequest,
        queue: &FrontierQueue,
        url: &str,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<ProcessReport> {
        let content_type = header_value(headers, "content-type");
        let is_html = content_type.is_none_or(|ct| ct.to_lowercase().contains("html"));

        let parsed_url = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                return Err(CrawlError::Internal(format!(
                    "stored canonical unparsable {url:?}: {e}"
                )));
            }
        };

        let body_text = String::from_utf8_lossy(body);
        let links: Vec<ExtractedLink> = if is_html {
            analyzer::extract_links(
                &body_text,
                &parsed_url,
                !self.options.follow_external_links,
            )
        } else {
            Vec::new()
        };

        let analysis = analyzer::analyze(&AnalyzerInput {
            url,
            status,
            content_type,
            body: &body_text,
            links: &links,
            gazetteer: &self.gazetteer,
            topics: &self.topics,
        });

        self.host_scores
            .observe(&req.host, analysis.classification.is_article_like());
        if analysis.classification.is_article_like() {
            let article_count = self.articles_seen.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(name) = article_milestone(article_count) {
                self.storage
                    .put_milestone(Some(req.job_id), name, &serde_json::json!({ "url": url }))
                    .await?;
                self.bus.publish(TelemetryEvent::milestone(
                    Some(req.job_id),
                    name,
                    serde_json::json!({ "count": article_count }),
                ));
            }
        }

        // Persist links and enqueue eligible discoveries.
        let links_discovered = links.len();
        let mut links_enqueued = 0;
        let next_depth = req.depth + 1;
        if next_depth <= self.options.max_depth {
            for link in &links {
                let Ok(dst_id) = self.urlstore.intern(&link.href).await else {
                    continue;
                };
                self.storage
                    .put_link(
                        req.url_id,
                        dst_id,
                        Some(&link.anchor).filter(|a| !a.is_empty()).map(String::as_str),
                        link.rel.as_deref(),
                    )
                    .await?;
                if !self.options.url_permitted(&link.href) {
                    continue;
                }
                let canonical = self.urlstore.resolve(dst_id).await?;
                let Ok(link_url) = Url::parse(&canonical) else {
                    continue;
                };
                let host = link_url.host_str().unwrap_or_default().to_string();
                let source = if link.nav_like {
                    RequestSource::Discovery
                } else {
                    RequestSource::ArticleCandidate
                };
                let priority = compute_priority(
                    source,
                    next_depth,
                    &canonical,
                    &self.gazetteer,
                    &self.topics,
                    self.host_scores.score(&host),
                );
                self.storage
                    .log_queue_event(req.job_id, QueueAction::Discovered, dst_id, next_depth)
                    .await?;
                let accepted = queue.enqueue(PendingRequest {
                    url_id: dst_id,
                    host,
                    priority,
                    depth: next_depth,
                    source,
                    job_id: req.job_id,
                    expected_value: None,
                });
                if accepted {
                    self.storage
                        .log_queue_event(req.job_id, QueueAction::Enqueued, dst_id, next_depth)
                        .await?;
                    links_enqueued += 1;
                }
            }
        }

        Ok(ProcessReport {
            disposition: FetchDisposition::FetchedNetwork,
            analysis: Some(analysis),
            links_discovered,
            links_enqueued,
        })
    }

    async fn settle_skipped(&self, req: &PendingRequest, reason: &str) -> Result<ProcessReport> {
        self.storage
            .log_queue_event(req.job_id, QueueAction::Skipped, req.url_id, req.depth)
            .await?;
        self.bus.publish(TelemetryEvent::problem(
            Some(req.job_id),
            ProblemSeverity::Info,
            "policy-blocked",
            reason,
            Some(req.url_id.0),
        ));
        Ok(ProcessReport {
            disposition: FetchDisposition::Skipped {
                reason: reason.to_string(),
            },
            analysis: None,
            links_discovered: 0,
            links_enqueued: 0,
        })
    }

    async fn settle_failed(&self, req: &PendingRequest, err: &CrawlError) -> Result<ProcessReport> {
        self.storage
            .log_queue_event(req.job_id, QueueAction::Failed, req.url_id, req.depth)
            .await?;
        // Parity: a failed fetch still records a response row marker so
        // resumption never re-enqueues it.
        self.storage
            .put_http_response(req.url_id, 0, &[], None, 0)
            .await?;
        self.bus.publish(TelemetryEvent::problem(
            Some(req.job_id),
            err.severity(),
            err.code(),
            err.to_string(),
            Some(req.url_id.0),
        ));
        Ok(ProcessReport {
            disposition: FetchDisposition::Failed {
                code: err.code().to_string(),
            },
            analysis: None,
            links_discovered: 0,
            links_enqueued: 0,
        })
    }

    /// Articles seen by this pipeline instance
    #[must_use]
    pub fn articles_seen(&self) -> u64 {
        self.articles_seen.load(Ordering::SeqCst)
    }
}

/// Map a Content-Type header onto the cache sub-type taxonomy
#[must_use]
pub fn subtype_of(content_type: Option<&str>) -> CacheSubtype {
    let Some(ct) = content_type else {
        return CacheSubtype::Html;
    };
    let mime = ct.split(';').next().unwrap_or("").trim().to_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => CacheSubtype::Html,
        "application/sparql-results+json" => CacheSubtype::SparqlResults,
        "application/json" | "application/ld+json" => CacheSubtype::JsonEntities,
        _ => CacheSubtype::Other,
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Milestone name for an article count, if one was just crossed
fn article_milestone(count: u64) -> Option<&'static str> {
    match count {
        1 => Some("first-article"),
        10 => Some("articles-10"),
        100 => Some("articles-100"),
        1000 => Some("articles-1000"),
        _ => None,
    }
}
