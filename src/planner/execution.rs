//! Operational plan tracking
//!
//! Drives a confirmed plan step by step, compares actual value against
//! expectation, and decides when to backtrack onto an alternative branch
//! or abandon the plan.

use crate::storage::PlanOutcomeRow;

use super::types::{Plan, PlanState, PlanStep};

/// Execution tunables
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// A step performing below this ratio of its expectation counts as low
    pub underperformance_threshold: f64,
    /// Consecutive low steps that trigger a backtrack
    pub low_steps_before_backtrack: u32,
    pub max_backtracks: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            underperformance_threshold: 0.5,
            low_steps_before_backtrack: 2,
            max_backtracks: 3,
        }
    }
}

/// Verdict after recording one step's actual value
#[derive(Debug, Clone, PartialEq)]
pub enum StepVerdict {
    Continue,
    /// Swap in this alternative step for the remaining work
    Backtrack(PlanStep),
    /// Backtrack budget exhausted; abandon the plan
    Abort,
    /// All steps recorded
    Done,
}

/// Tracks one plan through execution
pub struct PlanTracker {
    plan: Plan,
    config: TrackerConfig,
    state: PlanState,
    step_idx: usize,
    consecutive_low: u32,
    backtracks: u32,
    next_alternative: usize,
    recorded: Vec<(f64, f64)>,
}

impl PlanTracker {
    #[must_use]
    pub fn new(plan: Plan, config: TrackerConfig) -> Self {
        Self {
            plan,
            config,
            state: PlanState::Executing,
            step_idx: 0,
            consecutive_low: 0,
            backtracks: 0,
            next_alternative: 0,
            recorded: Vec::new(),
        }
    }

    /// The step currently being executed
    #[must_use]
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.steps.get(self.step_idx)
    }

    #[must_use]
    pub fn state(&self) -> PlanState {
        self.state
    }

    #[must_use]
    pub fn backtracks(&self) -> u32 {
        self.backtracks
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Record the actual value the current step produced
    pub fn record(&mut self, actual_value: f64) -> StepVerdict {
        let Some(step) = self.plan.steps.get(self.step_idx) else {
            self.state = PlanState::Completed;
            return StepVerdict::Done;
        };
        let expected = step.expected_value.max(f64::EPSILON);
        self.recorded.push((step.expected_value, actual_value));
        let ratio = actual_value / expected;
        self.step_idx += 1;

        if ratio < self.config.underperformance_threshold {
            self.consecutive_low += 1;
        } else {
            self.consecutive_low = 0;
        }

        if self.consecutive_low >= self.config.low_steps_before_backtrack {
            self.consecutive_low = 0;
            if self.backtracks >= self.config.max_backtracks {
                self.state = PlanState::Aborted;
                return StepVerdict::Abort;
            }
            match self.take_alternative() {
                Some(alternative) => {
                    self.backtracks += 1;
                    self.state = PlanState::Backtracking;
                    // The alternative branch is tried next; the original
                    // tail stays reachable behind it.
                    self.plan.steps.insert(self.step_idx, alternative.clone());
                    return StepVerdict::Backtrack(alternative);
                }
                None => {
                    self.state = PlanState::Aborted;
                    return StepVerdict::Abort;
                }
            }
        }

        if self.step_idx >= self.plan.steps.len() {
            self.state = PlanState::Completed;
            StepVerdict::Done
        } else {
            self.state = PlanState::Executing;
            StepVerdict::Continue
        }
    }

    fn take_alternative(&mut self) -> Option<PlanStep> {
        let alt = self.plan.alternatives.get(self.next_alternative).cloned();
        if alt.is_some() {
            self.next_alternative += 1;
        }
        alt
    }

    /// Per-step `(expected, actual)` pairs recorded so far
    #[must_use]
    pub fn step_results(&self) -> &[(f64, f64)] {
        &self.recorded
    }

    /// Summarise the execution into an outcome row
    #[must_use]
    pub fn outcome(&self, plan_id: i64, job_id: Option<i64>) -> PlanOutcomeRow {
        let actual_value: f64 = self.recorded.iter().map(|(_, a)| a).sum();
        let expected_value: f64 = self.recorded.iter().map(|(e, _)| e).sum();
        let performance_ratio = if expected_value > 0.0 {
            actual_value / expected_value
        } else {
            0.0
        };
        PlanOutcomeRow {
            plan_id,
            job_id,
            steps_completed: self.recorded.len() as u32,
            backtracks: self.backtracks,
            actual_value,
            performance_ratio,
            failure_reason: match self.state {
                PlanState::Aborted => Some("underperformance".to_string()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::types::{ActionKind, PlanGoal};

    fn plan_with(values: &[f64], alternatives: usize) -> Plan {
        let step = |v: f64, tag: usize| PlanStep {
            action: ActionKind::ExploreHub,
            target_url: format!("https://news.example/s{tag}"),
            expected_value: v,
            cost: 1.0,
            probability: 0.9,
        };
        Plan {
            id: Some(1),
            domain: "news.example".to_string(),
            goal: PlanGoal::MaximiseArticles,
            steps: values.iter().enumerate().map(|(i, v)| step(*v, i)).collect(),
            alternatives: (0..alternatives).map(|i| step(700.0, 100 + i)).collect(),
            estimated_value: values.iter().sum(),
            estimated_cost: values.len() as f64,
            probability: 0.9,
            lookahead: 5,
            branches_explored: 1,
            budget_exhausted: false,
        }
    }

    #[test]
    fn healthy_run_completes_without_backtracks() {
        let mut tracker = PlanTracker::new(plan_with(&[800.0, 800.0], 2), TrackerConfig::default());
        assert_eq!(tracker.record(900.0), StepVerdict::Continue);
        assert_eq!(tracker.record(850.0), StepVerdict::Done);
        assert_eq!(tracker.state(), PlanState::Completed);
        assert_eq!(tracker.backtracks(), 0);
    }

    #[test]
    fn two_consecutive_low_steps_trigger_backtrack() {
        let mut tracker = PlanTracker::new(
            plan_with(&[800.0, 800.0, 800.0, 800.0, 800.0], 2),
            TrackerConfig::default(),
        );
        assert_eq!(tracker.record(900.0), StepVerdict::Continue);
        assert_eq!(tracker.record(850.0), StepVerdict::Continue);
        assert_eq!(tracker.record(50.0), StepVerdict::Continue);
        match tracker.record(80.0) {
            StepVerdict::Backtrack(alt) => {
                assert!(alt.target_url.contains("s100"));
            }
            other => panic!("expected backtrack, got {other:?}"),
        }
        assert!(tracker.backtracks() >= 1);
        let outcome = tracker.outcome(1, Some(7));
        assert!(outcome.backtracks >= 1);
        assert_eq!(outcome.steps_completed, 4);
    }

    #[test]
    fn exhausted_alternatives_abort() {
        let mut tracker = PlanTracker::new(
            plan_with(&[800.0, 800.0, 800.0, 800.0], 0),
            TrackerConfig::default(),
        );
        assert_eq!(tracker.record(10.0), StepVerdict::Continue);
        assert_eq!(tracker.record(10.0), StepVerdict::Abort);
        assert_eq!(tracker.state(), PlanState::Aborted);
        let outcome = tracker.outcome(1, None);
        assert_eq!(outcome.failure_reason.as_deref(), Some("underperformance"));
    }

    #[test]
    fn backtrack_budget_is_bounded() {
        let mut tracker = PlanTracker::new(
            plan_with(&[800.0; 20], 10),
            TrackerConfig {
                max_backtracks: 1,
                ..TrackerConfig::default()
            },
        );
        assert_eq!(tracker.record(10.0), StepVerdict::Continue);
        assert!(matches!(tracker.record(10.0), StepVerdict::Backtrack(_)));
        assert_eq!(tracker.record(10.0), StepVerdict::Continue);
        // Second would-be backtrack exceeds the budget.
        assert_eq!(tracker.record(10.0), StepVerdict::Abort);
    }
}
