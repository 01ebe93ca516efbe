//! Crawl configuration types
//!
//! One process-wide options struct, built once at startup (or per crawl
//! request) and passed explicitly to the components that need it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, Result};

/// How a crawl is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlType {
    /// Plain breadth-first crawl from the seed
    Basic,
    /// Breadth-first plus a sitemap probe
    BasicWithSitemap,
    /// Planner-driven: preview, confirm, plan-directed seeding
    Intelligent,
    /// Sitemap URLs only
    SitemapOnly,
    /// Staged gazetteer ingestion mode
    Geography,
}

impl CrawlType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::BasicWithSitemap => "basic-with-sitemap",
            Self::Intelligent => "intelligent",
            Self::SitemapOnly => "sitemap-only",
            Self::Geography => "geography",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(Self::Basic),
            "basic-with-sitemap" => Ok(Self::BasicWithSitemap),
            "intelligent" => Ok(Self::Intelligent),
            "sitemap-only" => Ok(Self::SitemapOnly),
            "geography" => Ok(Self::Geography),
            other => Err(CrawlError::InvalidInput(format!(
                "unknown crawl type {other:?}"
            ))),
        }
    }
}

/// Cache consultation policy for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Serve from cache when fresh enough, else fetch
    PreferCache,
    /// Fetch, falling back to cache on failure
    PreferFresh,
    /// Never touch the network
    CacheOnly,
    /// Never touch the cache
    NetworkOnly,
}

impl FetchPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferCache => "prefer-cache",
            Self::PreferFresh => "prefer-fresh",
            Self::CacheOnly => "cache-only",
            Self::NetworkOnly => "network-only",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "prefer-cache" => Ok(Self::PreferCache),
            "prefer-fresh" => Ok(Self::PreferFresh),
            "cache-only" => Ok(Self::CacheOnly),
            "network-only" => Ok(Self::NetworkOnly),
            other => Err(CrawlError::InvalidInput(format!(
                "unknown fetch policy {other:?}"
            ))),
        }
    }
}

/// Feature toggles; defaults are conservative
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub advanced_planning_suite: bool,
    pub gap_driven: bool,
    pub planner_knowledge_reuse: bool,
    pub real_time_coverage: bool,
    pub problem_clustering: bool,
    pub problem_resolution: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            advanced_planning_suite: false,
            gap_driven: false,
            planner_knowledge_reuse: true,
            real_time_coverage: true,
            problem_clustering: true,
            problem_resolution: true,
        }
    }
}

/// Planner knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningOptions {
    pub max_lookahead: u32,
    pub max_branches: usize,
    pub budget_ms: u64,
    pub simulation_candidates: usize,
    pub max_backtracks: u32,
    pub learning_enabled: bool,
}

impl Default for PlanningOptions {
    fn default() -> Self {
        Self {
            max_lookahead: 5,
            max_branches: 10,
            budget_ms: 3500,
            simulation_candidates: 5,
            max_backtracks: 3,
            learning_enabled: true,
        }
    }
}

/// Hub freshness / decision tracing knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubFreshnessOptions {
    /// Persist the analyzer's per-decision signals JSON
    pub persist_decision_traces: bool,
}

/// The full option set for one crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlOptions {
    pub seed_url: String,
    pub crawl_type: CrawlType,
    /// Maximum workers; an upper bound in staged-ingestion mode
    pub concurrency: usize,
    pub max_depth: u32,
    pub max_pages: Option<u64>,
    pub max_downloads: Option<u64>,
    pub cache_policy: FetchPolicy,
    pub max_cache_age_ms: Option<u64>,
    pub fallback_to_cache: bool,
    pub features: FeatureFlags,
    pub planning: PlanningOptions,
    pub hub_freshness: HubFreshnessOptions,
    pub ingestion_force: bool,
    /// Content sub-type → compression preset name
    pub compression_presets: HashMap<String, String>,
    /// Content sub-type → TTL seconds
    pub cache_ttl_secs: HashMap<String, u64>,
    pub tracking_params: Vec<String>,
    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
    /// Compiled at build time to keep regexes out of the hot path
    #[serde(skip)]
    pub deny_patterns_compiled: Vec<regex::Regex>,
    #[serde(skip)]
    pub allow_patterns_compiled: Vec<regex::Regex>,
    pub min_interval_ms: u64,
    pub follow_external_links: bool,
    pub user_agent: String,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        let mut compression_presets = HashMap::new();
        compression_presets.insert("html".to_string(), "zstd-3".to_string());
        compression_presets.insert("sparql-results".to_string(), "gzip-6".to_string());
        compression_presets.insert("json-entities".to_string(), "gzip-6".to_string());
        compression_presets.insert("other".to_string(), "gzip-6".to_string());
        Self {
            seed_url: String::new(),
            crawl_type: CrawlType::Basic,
            concurrency: 1,
            max_depth: 3,
            max_pages: None,
            max_downloads: None,
            cache_policy: FetchPolicy::PreferCache,
            max_cache_age_ms: None,
            fallback_to_cache: true,
            features: FeatureFlags::default(),
            planning: PlanningOptions::default(),
            hub_freshness: HubFreshnessOptions::default(),
            ingestion_force: false,
            compression_presets,
            cache_ttl_secs: HashMap::new(),
            tracking_params: crate::urlstore::default_tracking_params(),
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            deny_patterns_compiled: Vec::new(),
            allow_patterns_compiled: Vec::new(),
            min_interval_ms: 1000,
            follow_external_links: false,
            user_agent: "newswire-crawler/0.3".to_string(),
        }
    }
}

impl CrawlOptions {
    /// Compression preset for a content sub-type
    pub fn preset_for(&self, subtype: &str) -> Result<crate::storage::CompressionPreset> {
        let name = self
            .compression_presets
            .get(subtype)
            .or_else(|| self.compression_presets.get("other"))
            .map_or("gzip-6", String::as_str);
        crate::storage::CompressionPreset::by_name(name)
    }

    /// A URL passes when it matches an allow pattern (if any are set) and
    /// matches no deny pattern.
    #[must_use]
    pub fn url_permitted(&self, url: &str) -> bool {
        if !self.allow_patterns_compiled.is_empty()
            && !self.allow_patterns_compiled.iter().any(|p| p.is_match(url))
        {
            return false;
        }
        !self.deny_patterns_compiled.iter().any(|p| p.is_match(url))
    }

    /// Effective page budget, the tighter of the two ceilings
    #[must_use]
    pub fn page_budget(&self) -> Option<u64> {
        match (self.max_pages, self.max_downloads) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
