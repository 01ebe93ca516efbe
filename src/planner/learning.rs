//! Heuristic learning from plan outcomes
//!
//! Every executed plan writes an outcome row; once a domain has
//! accumulated [`AGGREGATION_BATCH`] outcomes since its last
//! aggregation, performance ratios are folded into per-signature weights
//! that reasoners consult on subsequent plans.

use std::collections::HashMap;

use crate::error::Result;
use crate::storage::{PlanOutcomeRow, Storage};

use super::execution::PlanTracker;
use super::types::Plan;

/// Outcomes accumulated per domain before weights are re-aggregated
pub const AGGREGATION_BATCH: usize = 5;

/// Weights are clamped so one bad batch cannot zero out a strategy
const WEIGHT_FLOOR: f64 = 0.25;
const WEIGHT_CEILING: f64 = 2.0;

/// Records outcomes and maintains aggregated heuristic weights
pub struct HeuristicLearner {
    storage: Storage,
}

impl HeuristicLearner {
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Persist a finished tracker's outcome and step results, then
    /// re-aggregate the domain's weights if a batch boundary was crossed.
    pub async fn record(&self, tracker: &PlanTracker, job_id: Option<i64>) -> Result<()> {
        let plan = tracker.plan();
        let Some(plan_id) = plan.id else {
            // Unpersisted plans (tactical previews) leave no trace.
            return Ok(());
        };
        let outcome = tracker.outcome(plan_id, job_id);
        self.storage.put_plan_outcome(&outcome).await?;
        for (idx, (expected, actual)) in tracker.step_results().iter().enumerate() {
            self.storage
                .put_plan_step_result(plan_id, idx as u32, *expected, *actual)
                .await?;
        }

        let outcomes = self.storage.plan_outcomes_for_domain(&plan.domain).await?;
        if outcomes.len() % AGGREGATION_BATCH == 0 {
            self.aggregate(&plan.domain, &outcomes).await?;
        }
        Ok(())
    }

    /// Fold outcome ratios into signature weights for a domain
    async fn aggregate(&self, domain: &str, outcomes: &[PlanOutcomeRow]) -> Result<()> {
        let mut by_signature: HashMap<String, (f64, u64)> = HashMap::new();
        for outcome in outcomes {
            let Some(plan) = self.storage.get_plan(outcome.plan_id).await? else {
                continue;
            };
            let signature = steps_signature(&plan.steps);
            let entry = by_signature.entry(signature).or_insert((0.0, 0));
            entry.0 += outcome.performance_ratio;
            entry.1 += 1;
        }
        for (signature, (sum, count)) in by_signature {
            if count == 0 {
                continue;
            }
            let weight = (sum / count as f64).clamp(WEIGHT_FLOOR, WEIGHT_CEILING);
            self.storage
                .put_heuristic(domain, &signature, weight, count)
                .await?;
        }
        Ok(())
    }

    /// Current weights for a domain, keyed by signature
    pub async fn weights(&self, domain: &str) -> Result<HashMap<String, f64>> {
        Ok(self
            .storage
            .heuristics_for_domain(domain)
            .await?
            .into_iter()
            .collect())
    }
}

/// Signature of a persisted steps array: first three action kinds
fn steps_signature(steps: &serde_json::Value) -> String {
    steps
        .as_array()
        .map(|arr| {
            arr.iter()
                .take(3)
                .filter_map(|s| s.get("action").and_then(|a| a.as_str()))
                .collect::<Vec<_>>()
                .join(">")
        })
        .unwrap_or_default()
}

/// In-memory signature for an unpersisted plan
#[must_use]
pub fn plan_signature(plan: &Plan) -> String {
    plan.signature()
}
