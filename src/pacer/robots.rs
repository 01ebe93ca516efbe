//! Robots.txt evaluation, cached per host

use std::sync::Arc;

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use url::Url;

use crate::error::{CrawlError, Result};
use crate::fetch::Fetcher;

/// Cached robots.txt for one host. A missing or unfetchable robots.txt
/// allows everything.
#[derive(Debug)]
struct HostRobots {
    body: Option<String>,
}

/// Per-host robots verdict cache
pub struct RobotsGate {
    hosts: DashMap<String, Arc<HostRobots>>,
    user_agent: String,
}

impl RobotsGate {
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            hosts: DashMap::new(),
            user_agent: user_agent.into(),
        }
    }

    /// Whether `url` may be fetched, fetching and caching the host's
    /// robots.txt on first sight.
    pub async fn allowed(&self, url: &str, fetcher: &dyn Fetcher) -> Result<bool> {
        let parsed = Url::parse(url)
            .map_err(|e| CrawlError::InvalidInput(format!("robots check on bad URL {url:?}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidInput(format!("robots check on hostless URL {url:?}")))?
            .to_string();

        let robots = match self.hosts.get(&host) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let robots_url = format!(
                    "{}://{}{}/robots.txt",
                    parsed.scheme(),
                    host,
                    parsed
                        .port()
                        .map_or_else(String::new, |p| format!(":{p}"))
                );
                let body = match fetcher.fetch(&robots_url).await {
                    Ok(resp) if resp.status == 200 => Some(resp.body_text()),
                    // 4xx (no robots.txt) and transient failures both fall
                    // open; the crawl must not stall on a missing file.
                    Ok(_) | Err(_) => None,
                };
                let fresh = Arc::new(HostRobots { body });
                self.hosts.insert(host.clone(), Arc::clone(&fresh));
                fresh
            }
        };

        Ok(match &robots.body {
            Some(body) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url)
            }
            None => true,
        })
    }

    /// Pre-seed a verdict body for a host; used by tests and by imports
    /// of previously cached robots files.
    pub fn seed(&self, host: &str, body: Option<String>) {
        self.hosts
            .insert(host.to_string(), Arc::new(HostRobots { body }));
    }

    /// Number of hosts with a cached evaluation
    #[must_use]
    pub fn cached_hosts(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::fetch::FetchedResponse;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
            panic!("unexpected fetch of {url}");
        }
    }

    #[tokio::test]
    async fn seeded_disallow_blocks_matching_paths() {
        let gate = RobotsGate::new("newswire");
        gate.seed(
            "example.com",
            Some("User-agent: *\nDisallow: /private/\n".to_string()),
        );
        assert!(!gate
            .allowed("https://example.com/private/page", &NoFetch)
            .await
            .expect("check"));
        assert!(gate
            .allowed("https://example.com/public/page", &NoFetch)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn missing_robots_falls_open() {
        let gate = RobotsGate::new("newswire");
        gate.seed("example.com", None);
        assert!(gate
            .allowed("https://example.com/anything", &NoFetch)
            .await
            .expect("check"));
    }
}
