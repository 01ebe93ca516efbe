//! Configuration for crawl, planning and ingestion runs
//!
//! Provides `CrawlOptions` with a validating builder. Options are built
//! at startup or per control-surface request and passed explicitly; no
//! component reads configuration from globals.

pub mod builder;
pub mod types;

pub use builder::CrawlOptionsBuilder;
pub use types::{
    CrawlOptions, CrawlType, FeatureFlags, FetchPolicy, HubFreshnessOptions, PlanningOptions,
};
