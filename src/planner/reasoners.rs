//! Candidate reasoners for the strategic search
//!
//! Each reasoner proposes candidate actions for the current search node;
//! the search merges, weighs and bounds them. Reasoners are pure over
//! the planning context, which is snapshotted before the search starts.

use std::collections::HashMap;

use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::storage::PlaceKind;

use super::types::{ActionKind, PlanGoal, PlanStep};

/// Snapshot of everything reasoners may consult
pub struct PlanContext {
    pub domain: String,
    pub scheme: String,
    pub seed_url: String,
    pub goal: PlanGoal,
    /// Learned weights keyed by action-pattern signature
    pub heuristics: HashMap<String, f64>,
    /// Known high-out-degree pages on this host `(url, out_degree)`
    pub known_hubs: Vec<(String, u64)>,
    pub gazetteer_slugs: Vec<String>,
    pub topic_slugs: Vec<String>,
}

impl PlanContext {
    /// Learned multiplier for a candidate signature, defaulting to 1.0
    #[must_use]
    pub fn weight(&self, signature: &str) -> f64 {
        self.heuristics.get(signature).copied().unwrap_or(1.0)
    }

    /// Absolute URL on the planning domain
    #[must_use]
    pub fn url_for_path(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.domain, path)
    }
}

/// A proposed action plus the signature its weight is learned under
#[derive(Debug, Clone)]
pub struct CandidateAction {
    pub step: PlanStep,
    pub signature: String,
}

/// A node of the search tree, as visible to reasoners
pub struct SearchNode<'a> {
    pub depth: u32,
    pub chosen: &'a [PlanStep],
}

impl SearchNode<'_> {
    /// Whether a target URL is already part of the prefix
    #[must_use]
    pub fn already_targets(&self, url: &str) -> bool {
        self.chosen.iter().any(|s| s.target_url == url)
    }
}

/// A pluggable candidate proposer
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &'static str;
    fn propose(&self, node: &SearchNode<'_>, ctx: &PlanContext) -> Vec<CandidateAction>;
}

/// Proposes exploration of pages already known to have high out-degree,
/// and article fetches beneath hubs chosen earlier in the prefix.
pub struct GraphStructureReasoner;

impl Reasoner for GraphStructureReasoner {
    fn name(&self) -> &'static str {
        "graph-structure"
    }

    fn propose(&self, node: &SearchNode<'_>, ctx: &PlanContext) -> Vec<CandidateAction> {
        let mut candidates = Vec::new();
        for (url, degree) in &ctx.known_hubs {
            if node.already_targets(url) {
                continue;
            }
            // Out-degree is the value proxy: a hub with 40 outbound links
            // promises roughly that much downstream work.
            let value = (*degree as f64).min(200.0) * 10.0;
            candidates.push(CandidateAction {
                step: PlanStep {
                    action: ActionKind::ExploreHub,
                    target_url: url.clone(),
                    expected_value: value,
                    cost: 1.0,
                    probability: 0.9,
                },
                signature: "graph:explore-hub".to_string(),
            });
        }
        // Once a hub is in the prefix, harvesting it is the follow-up.
        if let Some(last) = node.chosen.last() {
            if last.action == ActionKind::ExploreHub {
                candidates.push(CandidateAction {
                    step: PlanStep {
                        action: ActionKind::FetchArticle,
                        target_url: last.target_url.clone(),
                        expected_value: last.expected_value * 0.6,
                        cost: 0.5,
                        probability: 0.8,
                    },
                    signature: "graph:harvest".to_string(),
                });
            }
        }
        candidates
    }
}

/// Proposes place/topic hub templates expanded against the gazetteer
pub struct GazetteerReasoner;

impl Reasoner for GazetteerReasoner {
    fn name(&self) -> &'static str {
        "gazetteer"
    }

    fn propose(&self, node: &SearchNode<'_>, ctx: &PlanContext) -> Vec<CandidateAction> {
        let mut candidates = Vec::new();
        for slug in ctx.topic_slugs.iter().take(8) {
            let url = ctx.url_for_path(&format!("/{slug}"));
            if node.already_targets(&url) {
                continue;
            }
            candidates.push(CandidateAction {
                step: PlanStep {
                    action: ActionKind::ExploreHub,
                    target_url: url,
                    expected_value: 400.0,
                    cost: 1.0,
                    probability: 0.6,
                },
                signature: "gazetteer:topic-hub".to_string(),
            });
        }
        for slug in ctx.gazetteer_slugs.iter().take(8) {
            let url = ctx.url_for_path(&format!("/{slug}"));
            if node.already_targets(&url) {
                continue;
            }
            candidates.push(CandidateAction {
                step: PlanStep {
                    action: ActionKind::ExploreHub,
                    target_url: url,
                    expected_value: 350.0,
                    cost: 1.0,
                    probability: 0.5,
                },
                signature: "gazetteer:place-hub".to_string(),
            });
        }
        candidates
    }
}

/// Baseline proposals available on any site: the sitemap probe and broad
/// discovery from the seed.
pub struct DiscoveryReasoner;

impl Reasoner for DiscoveryReasoner {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn propose(&self, node: &SearchNode<'_>, ctx: &PlanContext) -> Vec<CandidateAction> {
        let mut candidates = Vec::new();
        let sitemap = ctx.url_for_path("/sitemap.xml");
        if node.depth == 0 && !node.already_targets(&sitemap) {
            candidates.push(CandidateAction {
                step: PlanStep {
                    action: ActionKind::ProbeSitemap,
                    target_url: sitemap,
                    expected_value: 500.0,
                    cost: 0.5,
                    probability: 0.5,
                },
                signature: "discovery:sitemap".to_string(),
            });
        }
        if !node.already_targets(&ctx.seed_url) {
            candidates.push(CandidateAction {
                step: PlanStep {
                    action: ActionKind::DiscoverLinks,
                    target_url: ctx.seed_url.clone(),
                    expected_value: 300.0,
                    cost: 0.5,
                    probability: 0.95,
                },
                signature: "discovery:seed".to_string(),
            });
        }
        candidates
    }
}

/// The default reasoner set
#[must_use]
pub fn default_reasoners() -> Vec<Box<dyn Reasoner>> {
    vec![
        Box::new(DiscoveryReasoner),
        Box::new(GraphStructureReasoner),
        Box::new(GazetteerReasoner),
    ]
}

/// Build a planning context from parts; gazetteer and topic slugs are
/// snapshotted so the search stays deterministic.
#[must_use]
pub fn build_context(
    seed_url: &url::Url,
    goal: PlanGoal,
    heuristics: HashMap<String, f64>,
    known_hubs: Vec<(String, u64)>,
    gazetteer: &Gazetteer,
    topics: &TopicIndex,
) -> PlanContext {
    PlanContext {
        domain: seed_url.host_str().unwrap_or_default().to_string(),
        scheme: seed_url.scheme().to_string(),
        seed_url: seed_url.to_string(),
        goal,
        heuristics,
        known_hubs,
        gazetteer_slugs: gazetteer.slugs_of_kind(PlaceKind::Country),
        topic_slugs: topics.slugs(),
    }
}
