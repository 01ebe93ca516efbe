//! Adaptive hub seeding
//!
//! When a worker lands on an article, the seeder proposes hub candidates
//! for the same host, prices each with the tactical planner, and hands
//! back the feasible ones ranked by simulated value. With no planner
//! context available it falls back to fixed placeholder templates
//! expanded against the gazetteer and topic index.

use url::Url;

use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::planner::{simulate_sequence, ActionKind, PlanContext, PlanStep};

/// Default cap on candidates proposed per article
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

/// A priced hub candidate ready to enqueue
#[derive(Debug, Clone)]
pub struct SeedCandidate {
    pub url: String,
    pub expected_value: f64,
}

/// Proposes and ranks hub candidates
pub struct AdaptiveSeeder {
    max_candidates: usize,
}

impl AdaptiveSeeder {
    #[must_use]
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.max(1),
        }
    }

    /// Rank hub candidates for the host of `article_url`.
    ///
    /// Candidates come from the placeholder templates; each is simulated
    /// as a one-step explore action and dropped when infeasible.
    #[must_use]
    pub fn propose(
        &self,
        article_url: &str,
        ctx: &PlanContext,
        gazetteer: &Gazetteer,
        topics: &TopicIndex,
    ) -> Vec<SeedCandidate> {
        let Ok(parsed) = Url::parse(article_url) else {
            return Vec::new();
        };
        let mut ranked: Vec<SeedCandidate> = pattern_candidates(&parsed, gazetteer, topics)
            .into_iter()
            .filter_map(|url| {
                let step = PlanStep {
                    action: ActionKind::ExploreHub,
                    target_url: url.clone(),
                    expected_value: 300.0,
                    cost: 1.0,
                    probability: 0.6,
                };
                let report = simulate_sequence(std::slice::from_ref(&step), ctx);
                report.feasible.then(|| SeedCandidate {
                    url,
                    expected_value: report.net(),
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.expected_value
                .partial_cmp(&a.expected_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.url.cmp(&b.url))
        });
        ranked.truncate(self.max_candidates);
        ranked
    }

    /// Pattern-only fallback used when no planner context is available:
    /// the placeholder templates with a flat value, no simulation.
    #[must_use]
    pub fn propose_fallback(
        &self,
        article_url: &str,
        gazetteer: &Gazetteer,
        topics: &TopicIndex,
    ) -> Vec<SeedCandidate> {
        let Ok(parsed) = Url::parse(article_url) else {
            return Vec::new();
        };
        pattern_candidates(&parsed, gazetteer, topics)
            .into_iter()
            .take(self.max_candidates)
            .map(|url| SeedCandidate {
                url,
                expected_value: 100.0,
            })
            .collect()
    }
}

impl Default for AdaptiveSeeder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANDIDATES)
    }
}

/// The fixed placeholder templates, expanded against the gazetteer and
/// topic index: `/{slug}`, `/{country}/{slug}`, `/{country}/{region}/{topic}`.
#[must_use]
pub fn pattern_candidates(base: &Url, gazetteer: &Gazetteer, topics: &TopicIndex) -> Vec<String> {
    let origin = format!(
        "{}://{}",
        base.scheme(),
        base.host_str().unwrap_or_default()
    );
    let mut out = Vec::new();

    // Gazetteer slugs may carry non-ASCII names; encode them per segment.
    let encode = |slug: &str| urlencoding::encode(slug).into_owned();
    let topic_slugs: Vec<String> = topics.slugs().iter().map(|s| encode(s)).collect();
    let country_slugs: Vec<String> = gazetteer
        .slugs_of_kind(crate::storage::PlaceKind::Country)
        .iter()
        .map(|s| encode(s))
        .collect();
    let region_slugs: Vec<String> = gazetteer
        .slugs_of_kind(crate::storage::PlaceKind::Region)
        .iter()
        .map(|s| encode(s))
        .collect();

    for topic in topic_slugs.iter().take(8) {
        out.push(format!("{origin}/{topic}"));
    }
    for country in country_slugs.iter().take(4) {
        out.push(format!("{origin}/{country}"));
        for topic in topic_slugs.iter().take(3) {
            out.push(format!("{origin}/{country}/{topic}"));
        }
        for region in region_slugs.iter().take(2) {
            for topic in topic_slugs.iter().take(2) {
                out.push(format!("{origin}/{country}/{region}/{topic}"));
            }
        }
    }

    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanGoal;
    use std::collections::HashMap;

    fn ctx() -> PlanContext {
        PlanContext {
            domain: "news.example".to_string(),
            scheme: "https".to_string(),
            seed_url: "https://news.example/".to_string(),
            goal: PlanGoal::MaximiseArticles,
            heuristics: HashMap::new(),
            known_hubs: Vec::new(),
            gazetteer_slugs: Vec::new(),
            topic_slugs: Vec::new(),
        }
    }

    #[test]
    fn proposals_are_capped_and_ranked() {
        let seeder = AdaptiveSeeder::new(3);
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let candidates = seeder.propose(
            "https://news.example/2026/07/31/story",
            &ctx(),
            &gaz,
            &topics,
        );
        assert!(candidates.len() <= 3);
        assert!(!candidates.is_empty());
        for pair in candidates.windows(2) {
            assert!(pair[0].expected_value >= pair[1].expected_value);
        }
    }

    #[test]
    fn templates_stay_on_the_article_host() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let base = Url::parse("https://news.example/x").expect("url");
        for candidate in pattern_candidates(&base, &gaz, &topics) {
            assert!(candidate.starts_with("https://news.example/"));
        }
    }
}
