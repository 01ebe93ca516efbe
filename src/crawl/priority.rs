//! Request priority and host news scoring
//!
//! Priority is assigned once at enqueue time: a base by request source,
//! multiplied by an adjustment in `[0.5, 2.0]` derived from depth,
//! gazetteer and topic matches, and the host's learned news score. It
//! never changes for the life of the request.

use dashmap::DashMap;
use url::Url;

use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::queue::RequestSource;

/// Exponentially smoothed fraction of article-like fetches per host
pub struct HostScores {
    scores: DashMap<String, f64>,
}

/// Smoothing factor; one observation moves the score by a tenth
const ALPHA: f64 = 0.1;
/// Prior for hosts never observed
const DEFAULT_SCORE: f64 = 0.5;

impl HostScores {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scores: DashMap::new(),
        }
    }

    /// Fold one fetch outcome into the host's score
    pub fn observe(&self, host: &str, was_article: bool) {
        let observation = if was_article { 1.0 } else { 0.0 };
        let mut entry = self.scores.entry(host.to_string()).or_insert(DEFAULT_SCORE);
        *entry = *entry * (1.0 - ALPHA) + observation * ALPHA;
    }

    /// Current news score for a host, in `[0, 1]`
    #[must_use]
    pub fn score(&self, host: &str) -> f64 {
        self.scores.get(host).map_or(DEFAULT_SCORE, |s| *s)
    }
}

impl Default for HostScores {
    fn default() -> Self {
        Self::new()
    }
}

/// Base priority by request source; plan-directed work always outranks
/// organic discovery within the priority scale.
#[must_use]
pub fn base_priority(source: RequestSource) -> f64 {
    match source {
        RequestSource::PlanDirected => 100.0,
        RequestSource::HubCandidate => 70.0,
        RequestSource::ArticleCandidate => 50.0,
        RequestSource::Discovery => 20.0,
    }
}

/// Compute the final, immutable priority for a request
#[must_use]
pub fn compute_priority(
    source: RequestSource,
    depth: u32,
    url: &str,
    gazetteer: &Gazetteer,
    topics: &TopicIndex,
    host_news_score: f64,
) -> f64 {
    let mut adjustment = 1.0;

    // Depth discounts geometrically; depth 0 is unpenalised.
    adjustment *= 1.0 / (1.0 + f64::from(depth) * 0.2);

    if let Ok(parsed) = Url::parse(url) {
        let mut place_hit = false;
        let mut topic_hit = false;
        for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
            place_hit |= !gazetteer.match_slug(segment).is_empty();
            topic_hit |= topics.match_slug(segment).is_some();
        }
        if place_hit {
            adjustment += 0.3;
        }
        if topic_hit {
            adjustment += 0.2;
        }
    }

    // News-heavy hosts get up to +25%, news-free hosts up to -25%.
    adjustment *= 0.75 + host_news_score * 0.5;

    base_priority(source) * adjustment.clamp(0.5, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_score_converges_toward_observations() {
        let scores = HostScores::new();
        for _ in 0..50 {
            scores.observe("news.example", true);
        }
        assert!(scores.score("news.example") > 0.9);
        for _ in 0..50 {
            scores.observe("shop.example", false);
        }
        assert!(scores.score("shop.example") < 0.1);
        assert!((scores.score("unseen.example") - DEFAULT_SCORE).abs() < f64::EPSILON);
    }

    #[test]
    fn plan_directed_outranks_discovery_at_same_adjustment() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let plan = compute_priority(
            RequestSource::PlanDirected,
            2,
            "https://example.com/x",
            &gaz,
            &topics,
            0.5,
        );
        let disc = compute_priority(
            RequestSource::Discovery,
            2,
            "https://example.com/x",
            &gaz,
            &topics,
            0.5,
        );
        assert!(plan > disc * 2.0);
    }

    #[test]
    fn topic_match_raises_priority() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let with_topic = compute_priority(
            RequestSource::ArticleCandidate,
            1,
            "https://example.com/politics/story",
            &gaz,
            &topics,
            0.5,
        );
        let without = compute_priority(
            RequestSource::ArticleCandidate,
            1,
            "https://example.com/misc/story",
            &gaz,
            &topics,
            0.5,
        );
        assert!(with_topic > without);
    }

    #[test]
    fn adjustment_stays_in_bounds() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        for depth in 0..10 {
            for score in [0.0, 0.5, 1.0] {
                let p = compute_priority(
                    RequestSource::Discovery,
                    depth,
                    "https://example.com/politics/france",
                    &gaz,
                    &topics,
                    score,
                );
                let ratio = p / base_priority(RequestSource::Discovery);
                assert!((0.5..=2.0).contains(&ratio), "ratio {ratio} out of bounds");
            }
        }
    }
}
