//! Plan execution outcomes feeding heuristic aggregation

use newswire_crawler::planner::{
    ActionKind, HeuristicLearner, Plan, PlanGoal, PlanStep, PlanTracker, TrackerConfig,
};
use newswire_crawler::storage::Storage;
use tempfile::TempDir;

async fn storage() -> (Storage, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path()).await.expect("open storage");
    (storage, dir)
}

fn step(value: f64) -> PlanStep {
    PlanStep {
        action: ActionKind::ExploreHub,
        target_url: "https://news.example/world".to_string(),
        expected_value: value,
        cost: 1.0,
        probability: 0.9,
    }
}

async fn persisted_plan(storage: &Storage, values: &[f64]) -> Plan {
    let mut plan = Plan {
        id: None,
        domain: "news.example".to_string(),
        goal: PlanGoal::MaximiseArticles,
        steps: values.iter().map(|v| step(*v)).collect(),
        alternatives: vec![step(700.0)],
        estimated_value: values.iter().sum(),
        estimated_cost: values.len() as f64,
        probability: 0.9,
        lookahead: 5,
        branches_explored: 12,
        budget_exhausted: false,
    };
    let plan_id = storage
        .put_plan(
            &plan.domain,
            plan.goal.as_str(),
            &plan.steps_json(),
            plan.estimated_value,
            plan.estimated_cost,
            plan.probability,
            plan.lookahead,
            plan.branches_explored,
        )
        .await
        .expect("put plan");
    plan.id = Some(plan_id);
    plan
}

#[tokio::test]
async fn underperforming_plan_records_backtracks() {
    let (storage, _dir) = storage().await;
    let plan = persisted_plan(&storage, &[800.0, 800.0, 800.0, 800.0, 800.0]).await;
    let plan_id = plan.id.expect("persisted");

    let mut tracker = PlanTracker::new(plan, TrackerConfig::default());
    // Two healthy steps, then two far below the 0.5 threshold.
    tracker.record(900.0);
    tracker.record(850.0);
    tracker.record(50.0);
    tracker.record(80.0);
    assert!(tracker.backtracks() >= 1);

    let learner = HeuristicLearner::new(storage.clone());
    learner.record(&tracker, Some(1)).await.expect("record");

    let outcomes = storage
        .plan_outcomes_for_domain("news.example")
        .await
        .expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].plan_id, plan_id);
    assert!(outcomes[0].backtracks >= 1);
    assert!(outcomes[0].performance_ratio < 1.0);
}

#[tokio::test]
async fn weights_aggregate_after_five_outcomes() {
    let (storage, _dir) = storage().await;
    let learner = HeuristicLearner::new(storage.clone());

    for round in 0..5 {
        let plan = persisted_plan(&storage, &[800.0, 800.0]).await;
        let mut tracker = PlanTracker::new(plan, TrackerConfig::default());
        // Consistently strong execution.
        tracker.record(900.0 + f64::from(round));
        tracker.record(880.0);
        learner.record(&tracker, None).await.expect("record");
    }

    let weights = learner.weights("news.example").await.expect("weights");
    let weight = weights
        .get("explore-hub>explore-hub")
        .copied()
        .expect("signature aggregated");
    assert!(weight > 1.0, "strong outcomes should raise the weight, got {weight}");
    assert!(weight <= 2.0, "weights stay clamped");
}

#[tokio::test]
async fn step_results_are_persisted_per_index() {
    let (storage, _dir) = storage().await;
    let plan = persisted_plan(&storage, &[500.0, 600.0]).await;
    let plan_id = plan.id.expect("persisted");

    let mut tracker = PlanTracker::new(plan, TrackerConfig::default());
    tracker.record(450.0);
    tracker.record(700.0);
    HeuristicLearner::new(storage.clone())
        .record(&tracker, None)
        .await
        .expect("record");

    let rows: Vec<(i64, f64, f64)> = sqlx::query_as(
        "SELECT step_index, expected_value, actual_value FROM plan_step_results
         WHERE plan_id = ?1 ORDER BY step_index",
    )
    .bind(plan_id)
    .fetch_all(storage.pool())
    .await
    .expect("query");
    assert_eq!(rows.len(), 2);
    assert!((rows[0].1 - 500.0).abs() < f64::EPSILON);
    assert!((rows[1].2 - 700.0).abs() < f64::EPSILON);
}
