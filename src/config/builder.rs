//! Fluent builder for `CrawlOptions`
//!
//! Validation and pattern compilation happen once at build time so no
//! hot path ever parses a regex or second-guesses a bound.

use regex::Regex;

use crate::error::{CrawlError, Result};

use super::types::{CrawlOptions, CrawlType, FetchPolicy};

/// Compile a glob-ish pattern (`*` matches any run) into an anchored regex
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$"))
        .map_err(|e| CrawlError::InvalidInput(format!("invalid pattern {pattern:?}: {e}")))
}

/// Builder over [`CrawlOptions`]
#[derive(Debug, Clone, Default)]
pub struct CrawlOptionsBuilder {
    options: CrawlOptions,
}

impl CrawlOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn seed_url(mut self, url: impl Into<String>) -> Self {
        self.options.seed_url = url.into();
        self
    }

    #[must_use]
    pub fn crawl_type(mut self, crawl_type: CrawlType) -> Self {
        self.options.crawl_type = crawl_type;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.options.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.options.max_depth = depth;
        self
    }

    #[must_use]
    pub fn max_pages(mut self, pages: u64) -> Self {
        self.options.max_pages = Some(pages);
        self
    }

    #[must_use]
    pub fn cache_policy(mut self, policy: FetchPolicy) -> Self {
        self.options.cache_policy = policy;
        self
    }

    #[must_use]
    pub fn max_cache_age_ms(mut self, age_ms: u64) -> Self {
        self.options.max_cache_age_ms = Some(age_ms);
        self
    }

    #[must_use]
    pub fn fallback_to_cache(mut self, fallback: bool) -> Self {
        self.options.fallback_to_cache = fallback;
        self
    }

    #[must_use]
    pub fn min_interval_ms(mut self, interval: u64) -> Self {
        self.options.min_interval_ms = interval;
        self
    }

    #[must_use]
    pub fn deny_patterns(mut self, patterns: Vec<String>) -> Self {
        self.options.deny_patterns = patterns;
        self
    }

    #[must_use]
    pub fn allow_patterns(mut self, patterns: Vec<String>) -> Self {
        self.options.allow_patterns = patterns;
        self
    }

    #[must_use]
    pub fn follow_external_links(mut self, follow: bool) -> Self {
        self.options.follow_external_links = follow;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.options.user_agent = agent.into();
        self
    }

    #[must_use]
    pub fn learning_enabled(mut self, enabled: bool) -> Self {
        self.options.planning.learning_enabled = enabled;
        self
    }

    /// Validate, compile patterns and clamp bounds
    pub fn build(mut self) -> Result<CrawlOptions> {
        if self.options.seed_url.is_empty() && self.options.crawl_type != CrawlType::Geography {
            return Err(CrawlError::InvalidInput(
                "seed_url is required for webpage crawls".to_string(),
            ));
        }
        if !self.options.seed_url.is_empty() {
            // Reject malformed seeds here, not when the first worker runs.
            crate::urlstore::canonicalize(
                &self.options.seed_url,
                &crate::urlstore::CanonicalPolicy {
                    tracking_params: self.options.tracking_params.clone(),
                    fold_index_pages: true,
                },
            )?;
        }

        self.options.concurrency = self.options.concurrency.max(1);
        self.options.planning.max_lookahead = self.options.planning.max_lookahead.clamp(1, 10);
        self.options.planning.max_branches = self.options.planning.max_branches.clamp(1, 64);

        self.options.deny_patterns_compiled = self
            .options
            .deny_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>>>()?;
        self.options.allow_patterns_compiled = self
            .options
            .allow_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.options)
    }
}

impl CrawlOptions {
    /// Start building a fresh option set
    #[must_use]
    pub fn builder() -> CrawlOptionsBuilder {
        CrawlOptionsBuilder::new()
    }

    /// Rebuild compiled state after deserialisation (serde skips regexes)
    pub fn recompile_patterns(&mut self) -> Result<()> {
        self.deny_patterns_compiled = self
            .deny_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>>>()?;
        self.allow_patterns_compiled = self
            .allow_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_seed_for_webpage_crawls() {
        assert!(CrawlOptions::builder().build().is_err());
        assert!(CrawlOptions::builder()
            .crawl_type(CrawlType::Geography)
            .build()
            .is_ok());
        assert!(CrawlOptions::builder()
            .seed_url("https://example.com/")
            .build()
            .is_ok());
        assert!(CrawlOptions::builder().seed_url("not a url").build().is_err());
    }

    #[test]
    fn concurrency_is_clamped_to_at_least_one() {
        let options = CrawlOptions::builder()
            .seed_url("https://example.com/")
            .concurrency(0)
            .build()
            .expect("build");
        assert_eq!(options.concurrency, 1);
    }

    #[test]
    fn deny_patterns_filter_urls() {
        let options = CrawlOptions::builder()
            .seed_url("https://example.com/")
            .deny_patterns(vec!["*/private/*".to_string()])
            .build()
            .expect("build");
        assert!(!options.url_permitted("https://example.com/private/x"));
        assert!(options.url_permitted("https://example.com/public/x"));
    }

    #[test]
    fn allow_patterns_restrict_when_present() {
        let options = CrawlOptions::builder()
            .seed_url("https://example.com/")
            .allow_patterns(vec!["https://example.com/news/*".to_string()])
            .build()
            .expect("build");
        assert!(options.url_permitted("https://example.com/news/today"));
        assert!(!options.url_permitted("https://example.com/sport/today"));
    }

    #[test]
    fn options_round_trip_through_json() {
        let options = CrawlOptions::builder()
            .seed_url("https://example.com/")
            .max_pages(50)
            .deny_patterns(vec!["*/tmp/*".to_string()])
            .build()
            .expect("build");
        let json = serde_json::to_value(&options).expect("encode");
        let mut back: CrawlOptions = serde_json::from_value(json).expect("decode");
        back.recompile_patterns().expect("recompile");
        assert_eq!(back.seed_url, options.seed_url);
        assert_eq!(back.max_pages, Some(50));
        assert!(!back.url_permitted("https://example.com/tmp/x"));
    }
}
