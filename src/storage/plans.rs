//! Planner persistence: plans, outcomes, per-step results, heuristics

use sqlx::Row;

use super::Storage;
use crate::error::Result;

/// A persisted plan
#[derive(Debug, Clone)]
pub struct PlanRow {
    pub id: i64,
    pub domain: String,
    pub goal: String,
    pub steps: serde_json::Value,
    pub estimated_value: f64,
    pub estimated_cost: f64,
    pub probability: f64,
    pub lookahead: u32,
    pub branches_explored: u64,
}

/// A persisted plan outcome
#[derive(Debug, Clone)]
pub struct PlanOutcomeRow {
    pub plan_id: i64,
    pub job_id: Option<i64>,
    pub steps_completed: u32,
    pub backtracks: u32,
    pub actual_value: f64,
    pub performance_ratio: f64,
    pub failure_reason: Option<String>,
}

impl Storage {
    /// Persist a generated plan, returning its ID
    #[allow(clippy::too_many_arguments)]
    pub async fn put_plan(
        &self,
        domain: &str,
        goal: &str,
        steps: &serde_json::Value,
        estimated_value: f64,
        estimated_cost: f64,
        probability: f64,
        lookahead: u32,
        branches_explored: u64,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO plans
                (domain, goal, steps, estimated_value, estimated_cost, probability,
                 lookahead, branches_explored, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
        )
        .bind(domain)
        .bind(goal)
        .bind(steps.to_string())
        .bind(estimated_value)
        .bind(estimated_cost)
        .bind(probability)
        .bind(lookahead as i64)
        .bind(branches_explored as i64)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Fetch a plan by ID
    pub async fn get_plan(&self, plan_id: i64) -> Result<Option<PlanRow>> {
        let row = sqlx::query(
            "SELECT id, domain, goal, steps, estimated_value, estimated_cost, probability,
                    lookahead, branches_explored
             FROM plans WHERE id = ?1",
        )
        .bind(plan_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| PlanRow {
            id: r.get(0),
            domain: r.get(1),
            goal: r.get(2),
            steps: serde_json::from_str(&r.get::<String, _>(3)).unwrap_or(serde_json::Value::Null),
            estimated_value: r.get(4),
            estimated_cost: r.get(5),
            probability: r.get(6),
            lookahead: r.get::<i64, _>(7) as u32,
            branches_explored: r.get::<i64, _>(8) as u64,
        }))
    }

    /// Record a post-execution outcome
    pub async fn put_plan_outcome(&self, outcome: &PlanOutcomeRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO plan_outcomes
                (plan_id, job_id, steps_completed, backtracks, actual_value,
                 performance_ratio, failure_reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(outcome.plan_id)
        .bind(outcome.job_id)
        .bind(outcome.steps_completed as i64)
        .bind(outcome.backtracks as i64)
        .bind(outcome.actual_value)
        .bind(outcome.performance_ratio)
        .bind(outcome.failure_reason.as_deref())
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record per-step expected vs actual values
    pub async fn put_plan_step_result(
        &self,
        plan_id: i64,
        step_index: u32,
        expected_value: f64,
        actual_value: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO plan_step_results (plan_id, step_index, expected_value, actual_value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(plan_id, step_index) DO UPDATE SET actual_value = excluded.actual_value",
        )
        .bind(plan_id)
        .bind(step_index as i64)
        .bind(expected_value)
        .bind(actual_value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Outcomes recorded for a domain, newest first
    pub async fn plan_outcomes_for_domain(&self, domain: &str) -> Result<Vec<PlanOutcomeRow>> {
        let rows = sqlx::query(
            "SELECT o.plan_id, o.job_id, o.steps_completed, o.backtracks, o.actual_value,
                    o.performance_ratio, o.failure_reason
             FROM plan_outcomes o JOIN plans p ON p.id = o.plan_id
             WHERE p.domain = ?1
             ORDER BY o.id DESC",
        )
        .bind(domain)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|r| PlanOutcomeRow {
                plan_id: r.get(0),
                job_id: r.get(1),
                steps_completed: r.get::<i64, _>(2) as u32,
                backtracks: r.get::<i64, _>(3) as u32,
                actual_value: r.get(4),
                performance_ratio: r.get(5),
                failure_reason: r.get(6),
            })
            .collect())
    }

    /// Upsert an aggregated heuristic weight
    pub async fn put_heuristic(
        &self,
        domain: &str,
        signature: &str,
        weight: f64,
        samples: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO planning_heuristics (domain, signature, weight, samples, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(domain, signature) DO UPDATE SET
                weight = excluded.weight,
                samples = excluded.samples,
                updated_at = excluded.updated_at",
        )
        .bind(domain)
        .bind(signature)
        .bind(weight)
        .bind(samples as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Heuristic weights for a domain as `(signature, weight)` pairs
    pub async fn heuristics_for_domain(&self, domain: &str) -> Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            "SELECT signature, weight FROM planning_heuristics WHERE domain = ?1",
        )
        .bind(domain)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }
}
