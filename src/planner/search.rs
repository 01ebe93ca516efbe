//! Strategic branch-and-bound search
//!
//! Depth-first over candidate actions proposed by the reasoners.
//! Branches whose optimistic bound falls below `prune_ratio` of the best
//! completed plan are cut; the whole search is time-bounded and returns
//! the best plan found so far with a flag when the budget runs out.

use std::time::{Duration, Instant};

use super::reasoners::{PlanContext, Reasoner, SearchNode};
use super::types::{Plan, PlanStep};

/// Search tunables; defaults match the engine configuration defaults
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub max_lookahead: u32,
    pub max_branches: usize,
    pub budget: Duration,
    pub prune_ratio: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_lookahead: 5,
            max_branches: 10,
            budget: Duration::from_millis(3500),
            prune_ratio: 0.5,
        }
    }
}

/// Result of a strategic search
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub plan: Plan,
    pub branches_explored: u64,
    pub budget_exhausted: bool,
}

struct SearchDriver<'a> {
    ctx: &'a PlanContext,
    reasoners: &'a [Box<dyn Reasoner>],
    config: &'a SearchConfig,
    deadline: Instant,
    best_steps: Vec<PlanStep>,
    best_score: f64,
    branches_explored: u64,
    budget_exhausted: bool,
}

/// Run the strategic search over a context
#[must_use]
pub fn strategic_search(
    ctx: &PlanContext,
    reasoners: &[Box<dyn Reasoner>],
    config: &SearchConfig,
) -> SearchOutcome {
    let mut driver = SearchDriver {
        ctx,
        reasoners,
        config,
        deadline: Instant::now() + config.budget,
        best_steps: Vec::new(),
        best_score: f64::NEG_INFINITY,
        branches_explored: 0,
        budget_exhausted: false,
    };

    let mut prefix = Vec::new();
    driver.descend(&mut prefix, 0.0);

    let steps = driver.best_steps;
    let estimated_value: f64 = steps.iter().map(|s| s.expected_value * s.probability).sum();
    let estimated_cost: f64 = steps.iter().map(|s| s.cost).sum();
    let probability = steps
        .iter()
        .map(|s| s.probability)
        .fold(1.0_f64, |acc, p| acc * p)
        .max(0.0);

    // Runner-up root candidates become backtracking alternatives.
    let alternatives = driver_root_alternatives(ctx, reasoners, config, &steps);

    SearchOutcome {
        plan: Plan {
            id: None,
            domain: ctx.domain.clone(),
            goal: ctx.goal,
            steps,
            alternatives,
            estimated_value,
            estimated_cost,
            probability,
            lookahead: config.max_lookahead,
            branches_explored: driver.branches_explored,
            budget_exhausted: driver.budget_exhausted,
        },
        branches_explored: driver.branches_explored,
        budget_exhausted: driver.budget_exhausted,
    }
}

impl SearchDriver<'_> {
    fn descend(&mut self, prefix: &mut Vec<PlanStep>, score_so_far: f64) {
        if prefix.len() as u32 >= self.config.max_lookahead {
            self.consider(prefix, score_so_far);
            return;
        }
        // The root level always expands so an exhausted budget still
        // yields a usable single-step plan.
        if Instant::now() >= self.deadline && !prefix.is_empty() {
            self.budget_exhausted = true;
            self.consider(prefix, score_so_far);
            return;
        }

        let candidates = self.gather_candidates(prefix);
        if candidates.is_empty() {
            self.consider(prefix, score_so_far);
            return;
        }

        // Optimistic bound: the remaining depth can at best repeat the
        // strongest candidate seen at this node.
        let best_candidate_net = candidates
            .first()
            .map(PlanStep::net_value)
            .unwrap_or_default()
            .max(0.0);
        let remaining = f64::from(self.config.max_lookahead - prefix.len() as u32);

        for step in candidates {
            if self.budget_exhausted {
                break;
            }
            let bound = score_so_far + step.net_value().max(0.0) + best_candidate_net * (remaining - 1.0);
            if self.best_score > 0.0 && bound < self.best_score * self.config.prune_ratio {
                continue;
            }
            self.branches_explored += 1;
            let step_score = step.net_value();
            prefix.push(step);
            self.descend(prefix, score_so_far + step_score);
            prefix.pop();
        }
    }

    /// Merge, weigh, dedup and rank candidates from every reasoner
    fn gather_candidates(&self, prefix: &[PlanStep]) -> Vec<PlanStep> {
        let node = SearchNode {
            depth: prefix.len() as u32,
            chosen: prefix,
        };
        let mut merged: Vec<PlanStep> = Vec::new();
        for reasoner in self.reasoners {
            for candidate in reasoner.propose(&node, self.ctx) {
                let mut step = candidate.step;
                step.expected_value *= self.ctx.weight(&candidate.signature);
                if merged.iter().any(|s| s.target_url == step.target_url) {
                    continue;
                }
                merged.push(step);
            }
        }
        merged.sort_by(|a, b| {
            b.net_value()
                .partial_cmp(&a.net_value())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_url.cmp(&b.target_url))
        });
        merged.truncate(self.config.max_branches);
        merged
    }

    fn consider(&mut self, prefix: &[PlanStep], score: f64) {
        if prefix.is_empty() {
            return;
        }
        if score > self.best_score {
            self.best_score = score;
            self.best_steps = prefix.to_vec();
        }
    }
}

/// Root-level candidates not used by the winning plan, kept as
/// backtracking alternatives in ranked order.
fn driver_root_alternatives(
    ctx: &PlanContext,
    reasoners: &[Box<dyn Reasoner>],
    config: &SearchConfig,
    chosen: &[PlanStep],
) -> Vec<PlanStep> {
    let node = SearchNode { depth: 0, chosen: &[] };
    let mut merged: Vec<PlanStep> = Vec::new();
    for reasoner in reasoners {
        for candidate in reasoner.propose(&node, ctx) {
            let mut step = candidate.step;
            step.expected_value *= ctx.weight(&candidate.signature);
            if merged.iter().any(|s| s.target_url == step.target_url)
                || chosen.iter().any(|s| s.target_url == step.target_url)
            {
                continue;
            }
            merged.push(step);
        }
    }
    merged.sort_by(|a, b| {
        b.net_value()
            .partial_cmp(&a.net_value())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target_url.cmp(&b.target_url))
    });
    merged.truncate(config.max_branches);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::reasoners::default_reasoners;
    use crate::planner::types::PlanGoal;
    use std::collections::HashMap;

    fn ctx() -> PlanContext {
        PlanContext {
            domain: "news.example".to_string(),
            scheme: "https".to_string(),
            seed_url: "https://news.example/".to_string(),
            goal: PlanGoal::MaximiseArticles,
            heuristics: HashMap::new(),
            known_hubs: vec![
                ("https://news.example/world".to_string(), 60),
                ("https://news.example/politics".to_string(), 45),
            ],
            gazetteer_slugs: vec!["france".to_string(), "germany".to_string()],
            topic_slugs: vec!["politics".to_string(), "sport".to_string()],
        }
    }

    #[test]
    fn search_produces_a_nonempty_plan_within_lookahead() {
        let reasoners = default_reasoners();
        let outcome = strategic_search(&ctx(), &reasoners, &SearchConfig::default());
        assert!(!outcome.plan.steps.is_empty());
        assert!(outcome.plan.steps.len() <= 5);
        assert!(outcome.branches_explored > 0);
        assert!(outcome.plan.estimated_value > 0.0);
    }

    #[test]
    fn search_is_deterministic_for_identical_context() {
        let reasoners = default_reasoners();
        let a = strategic_search(&ctx(), &reasoners, &SearchConfig::default());
        let b = strategic_search(&ctx(), &reasoners, &SearchConfig::default());
        let urls = |o: &SearchOutcome| {
            o.plan
                .steps
                .iter()
                .map(|s| s.target_url.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(urls(&a), urls(&b));
    }

    #[test]
    fn exhausted_budget_still_returns_best_so_far() {
        let reasoners = default_reasoners();
        let config = SearchConfig {
            budget: Duration::ZERO,
            ..SearchConfig::default()
        };
        let outcome = strategic_search(&ctx(), &reasoners, &config);
        assert!(outcome.budget_exhausted);
        assert!(!outcome.plan.steps.is_empty());
    }

    #[test]
    fn heuristic_weights_reorder_candidates() {
        let reasoners = default_reasoners();
        let mut weighted = ctx();
        weighted
            .heuristics
            .insert("gazetteer:topic-hub".to_string(), 5.0);
        let outcome = strategic_search(&weighted, &reasoners, &SearchConfig::default());
        let first = &outcome.plan.steps[0];
        assert!(
            first.target_url.contains("/politics") || first.target_url.contains("/sport"),
            "expected a topic hub first, got {}",
            first.target_url
        );
    }

    #[test]
    fn alternatives_exclude_chosen_targets() {
        let reasoners = default_reasoners();
        let outcome = strategic_search(&ctx(), &reasoners, &SearchConfig::default());
        for alt in &outcome.plan.alternatives {
            assert!(
                !outcome.plan.steps.iter().any(|s| s.target_url == alt.target_url),
                "alternative {} duplicates a plan step",
                alt.target_url
            );
        }
    }
}
