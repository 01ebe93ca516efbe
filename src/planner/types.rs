//! Plan data model

use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, Result};

/// The closed set of plannable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Fetch a hub page expected to yield many article links
    ExploreHub,
    /// Fetch a page expected to be an article
    FetchArticle,
    /// Broad link discovery on an already-known page
    DiscoverLinks,
    /// Probe the sitemap for seed URLs
    ProbeSitemap,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExploreHub => "explore-hub",
            Self::FetchArticle => "fetch-article",
            Self::DiscoverLinks => "discover-links",
            Self::ProbeSitemap => "probe-sitemap",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "explore-hub" => Ok(Self::ExploreHub),
            "fetch-article" => Ok(Self::FetchArticle),
            "discover-links" => Ok(Self::DiscoverLinks),
            "probe-sitemap" => Ok(Self::ProbeSitemap),
            other => Err(CrawlError::InvalidInput(format!("unknown action {other:?}"))),
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: ActionKind,
    pub target_url: String,
    pub expected_value: f64,
    pub cost: f64,
    pub probability: f64,
}

impl PlanStep {
    /// Probability-weighted net contribution of this step
    #[must_use]
    pub fn net_value(&self) -> f64 {
        self.expected_value * self.probability - self.cost
    }
}

/// What the planner is optimising for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanGoal {
    /// Maximise distinct articles fetched
    MaximiseArticles,
    /// Map the hub structure of the site
    MapHubs,
    /// Fill gazetteer coverage gaps
    CoverGaps,
}

impl PlanGoal {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaximiseArticles => "maximise-articles",
            Self::MapHubs => "map-hubs",
            Self::CoverGaps => "cover-gaps",
        }
    }
}

/// State machine of a plan's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Strategic,
    Simulated,
    Confirmed,
    Executing,
    Backtracking,
    Completed,
    Aborted,
}

/// A generated plan: an ordered action sequence with value estimates.
///
/// `alternatives` holds runner-up steps from the search, consumed when
/// execution backtracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Option<i64>,
    pub domain: String,
    pub goal: PlanGoal,
    pub steps: Vec<PlanStep>,
    pub alternatives: Vec<PlanStep>,
    pub estimated_value: f64,
    pub estimated_cost: f64,
    pub probability: f64,
    pub lookahead: u32,
    pub branches_explored: u64,
    /// Set when the search hit its time budget before exhausting the tree
    pub budget_exhausted: bool,
}

impl Plan {
    /// Signature describing the action pattern, used for heuristic
    /// aggregation: the first three step kinds joined with `>`.
    #[must_use]
    pub fn signature(&self) -> String {
        self.steps
            .iter()
            .take(3)
            .map(|s| s.action.as_str())
            .collect::<Vec<_>>()
            .join(">")
    }

    /// Serialise the steps for persistence
    #[must_use]
    pub fn steps_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.steps).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_uses_first_three_actions() {
        let step = |action| PlanStep {
            action,
            target_url: "https://example.com/".to_string(),
            expected_value: 1.0,
            cost: 0.1,
            probability: 0.9,
        };
        let plan = Plan {
            id: None,
            domain: "example.com".to_string(),
            goal: PlanGoal::MaximiseArticles,
            steps: vec![
                step(ActionKind::ProbeSitemap),
                step(ActionKind::ExploreHub),
                step(ActionKind::FetchArticle),
                step(ActionKind::FetchArticle),
            ],
            alternatives: Vec::new(),
            estimated_value: 4.0,
            estimated_cost: 0.4,
            probability: 0.9,
            lookahead: 4,
            branches_explored: 10,
            budget_exhausted: false,
        };
        assert_eq!(plan.signature(), "probe-sitemap>explore-hub>fetch-article");
    }
}
