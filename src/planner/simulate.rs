//! Tactical simulation
//!
//! Predicts the outcome of a short action sequence without enqueueing
//! anything. The adaptive seeder uses this to rank freshly discovered
//! hub candidates before committing them to the queue.

use super::reasoners::PlanContext;
use super::types::{ActionKind, PlanStep};

/// Feasibility cut-off: a sequence whose compound probability drops
/// below this is not worth committing.
const MIN_FEASIBLE_PROBABILITY: f64 = 0.05;

/// Predicted outcome of a simulated sequence
#[derive(Debug, Clone, Copy)]
pub struct SimulationReport {
    pub feasible: bool,
    pub total_value: f64,
    pub total_cost: f64,
}

impl SimulationReport {
    /// Value net of cost; what candidates are ranked by
    #[must_use]
    pub fn net(&self) -> f64 {
        self.total_value - self.total_cost
    }
}

/// Simulate a candidate action sequence against the planning context.
///
/// Learned heuristic weights and action-kind base rates shape the
/// prediction; nothing is fetched and no state changes.
#[must_use]
pub fn simulate_sequence(steps: &[PlanStep], ctx: &PlanContext) -> SimulationReport {
    if steps.is_empty() {
        return SimulationReport {
            feasible: false,
            total_value: 0.0,
            total_cost: 0.0,
        };
    }

    let mut total_value = 0.0;
    let mut total_cost = 0.0;
    let mut compound_probability = 1.0;

    for step in steps {
        let base_rate = action_base_rate(step.action);
        let weight = ctx.weight(&format!("simulate:{}", step.action.as_str()));
        let probability = (step.probability * base_rate * weight).clamp(0.0, 1.0);
        compound_probability *= probability;
        total_value += step.expected_value * probability;
        total_cost += step.cost;
    }

    SimulationReport {
        feasible: compound_probability >= MIN_FEASIBLE_PROBABILITY,
        total_value,
        total_cost,
    }
}

/// Prior success rate per action kind, before learning
fn action_base_rate(action: ActionKind) -> f64 {
    match action {
        ActionKind::DiscoverLinks => 0.95,
        ActionKind::FetchArticle => 0.85,
        ActionKind::ExploreHub => 0.75,
        ActionKind::ProbeSitemap => 0.5,
    }
}
