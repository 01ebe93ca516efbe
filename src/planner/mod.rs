//! Strategic lookahead planner
//!
//! Three modes over one data model: strategic search builds a plan
//! before any fetch, tactical simulation prices short sequences for the
//! adaptive seeder, and operational tracking drives a confirmed plan and
//! learns from its outcome.

use std::sync::Arc;

use url::Url;

use crate::error::{CrawlError, Result};
use crate::gazetteer::{Gazetteer, TopicIndex};
use crate::storage::Storage;

pub mod execution;
pub mod learning;
pub mod reasoners;
pub mod search;
pub mod session;
pub mod simulate;
pub mod types;

pub use execution::{PlanTracker, StepVerdict, TrackerConfig};
pub use learning::HeuristicLearner;
pub use reasoners::{default_reasoners, CandidateAction, PlanContext, Reasoner, SearchNode};
pub use search::{strategic_search, SearchConfig, SearchOutcome};
pub use session::{
    options_fingerprint, ConfirmedSession, PlanBlueprint, PlanningSession, SessionManager,
};
pub use simulate::{simulate_sequence, SimulationReport};
pub use types::{ActionKind, Plan, PlanGoal, PlanState, PlanStep};

/// The planner facade owned by a crawl controller
pub struct Planner {
    storage: Storage,
    gazetteer: Arc<Gazetteer>,
    topics: Arc<TopicIndex>,
    reasoners: Vec<Box<dyn Reasoner>>,
    search_config: SearchConfig,
    learner: HeuristicLearner,
    learning_enabled: bool,
    /// Consult learned weights on new plans (`features.planner_knowledge_reuse`)
    knowledge_reuse: bool,
}

impl Planner {
    #[must_use]
    pub fn new(
        storage: Storage,
        gazetteer: Arc<Gazetteer>,
        topics: Arc<TopicIndex>,
        search_config: SearchConfig,
        learning_enabled: bool,
        knowledge_reuse: bool,
    ) -> Self {
        let learner = HeuristicLearner::new(storage.clone());
        Self {
            storage,
            gazetteer,
            topics,
            reasoners: default_reasoners(),
            search_config,
            learner,
            learning_enabled,
            knowledge_reuse,
        }
    }

    /// Snapshot a planning context for a seed URL
    pub async fn build_context(&self, seed_url: &str, goal: PlanGoal) -> Result<PlanContext> {
        let parsed = Url::parse(seed_url)
            .map_err(|e| CrawlError::InvalidInput(format!("bad seed URL {seed_url:?}: {e}")))?;
        let domain = parsed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidInput(format!("seed URL has no host: {seed_url:?}")))?;

        let heuristics = if self.knowledge_reuse {
            self.learner.weights(domain).await?
        } else {
            std::collections::HashMap::new()
        };
        let known_hubs = {
            let degrees = self.storage.host_out_degrees(domain).await?;
            let mut hubs = Vec::with_capacity(degrees.len().min(16));
            for (url_id, degree) in degrees.into_iter().take(16) {
                // Hubs need their canonical form back for planning targets.
                let row = sqlx::query_as::<_, (String,)>("SELECT canonical FROM urls WHERE id = ?1")
                    .bind(url_id.0)
                    .fetch_optional(self.storage.pool())
                    .await?;
                if let Some((canonical,)) = row {
                    hubs.push((canonical, degree));
                }
            }
            hubs
        };

        Ok(reasoners::build_context(
            &parsed,
            goal,
            heuristics,
            known_hubs,
            &self.gazetteer,
            &self.topics,
        ))
    }

    /// Strategic mode: search out a plan and persist it
    pub async fn strategic(&self, seed_url: &str, goal: PlanGoal) -> Result<SearchOutcome> {
        let ctx = self.build_context(seed_url, goal).await?;
        let mut outcome = strategic_search(&ctx, &self.reasoners, &self.search_config);
        let plan_id = self
            .storage
            .put_plan(
                &outcome.plan.domain,
                outcome.plan.goal.as_str(),
                &outcome.plan.steps_json(),
                outcome.plan.estimated_value,
                outcome.plan.estimated_cost,
                outcome.plan.probability,
                outcome.plan.lookahead,
                outcome.plan.branches_explored,
            )
            .await?;
        outcome.plan.id = Some(plan_id);
        Ok(outcome)
    }

    /// Tactical mode: price a candidate sequence without side effects
    #[must_use]
    pub fn tactical(&self, steps: &[PlanStep], ctx: &PlanContext) -> SimulationReport {
        simulate_sequence(steps, ctx)
    }

    /// Start operational tracking of a confirmed plan
    #[must_use]
    pub fn track(&self, plan: Plan, config: TrackerConfig) -> PlanTracker {
        PlanTracker::new(plan, config)
    }

    /// Record a finished tracker, feeding heuristic learning
    pub async fn record_outcome(&self, tracker: &PlanTracker, job_id: Option<i64>) -> Result<()> {
        if !self.learning_enabled {
            return Ok(());
        }
        self.learner.record(tracker, job_id).await
    }

    /// The learner, for components that only need weights
    #[must_use]
    pub fn learner(&self) -> &HeuristicLearner {
        &self.learner
    }
}
