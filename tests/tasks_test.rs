//! Background tasks: lifecycle, persisted progress, restart rehydration

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newswire_crawler::error::{CrawlError, Result};
use newswire_crawler::events::TelemetryBus;
use newswire_crawler::gazetteer::{Gazetteer, TopicIndex};
use newswire_crawler::storage::{CompressionPreset, Storage, TaskStatus};
use newswire_crawler::tasks::{
    BackgroundJob, BackgroundTaskManager, TaskContext, TaskRegistry,
};
use tempfile::TempDir;

async fn manager_with(registry: TaskRegistry) -> (BackgroundTaskManager, Storage, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path()).await.expect("open storage");
    let manager = BackgroundTaskManager::new(
        storage.clone(),
        Arc::new(TelemetryBus::new()),
        Arc::new(Gazetteer::empty()),
        Arc::new(TopicIndex::default_news()),
        registry,
        2,
    );
    (manager, storage, dir)
}

/// Counts to 40 slowly, checking the signal and persisting a cursor
struct SlowCountJob;

#[async_trait]
impl BackgroundJob for SlowCountJob {
    fn kind(&self) -> &'static str {
        "slow-count"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        let start = ctx.resume_point().max(0) as u64;
        for i in start..40 {
            if ctx.cancelled() {
                ctx.persist_cursor(i, serde_json::json!({ "after": i })).await?;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.emit_progress(i + 1, Some(40), serde_json::json!({ "after": i + 1 }))
                .await?;
        }
        ctx.persist_cursor(40, serde_json::json!({ "after": 40 })).await?;
        Ok(())
    }
}

fn registry_with_slow_count() -> TaskRegistry {
    let mut registry = TaskRegistry::with_builtins();
    registry.register(Arc::new(SlowCountJob));
    registry
}

#[tokio::test]
async fn unknown_kind_is_rejected_at_create() {
    let (manager, _storage, _dir) = manager_with(TaskRegistry::with_builtins()).await;
    let result = manager.create("defragment-floppy", serde_json::json!({})).await;
    assert!(matches!(result, Err(CrawlError::InvalidInput(_))));
}

#[tokio::test]
async fn task_runs_to_completion() {
    let (manager, storage, _dir) = manager_with(registry_with_slow_count()).await;
    let task_id = manager
        .create("slow-count", serde_json::json!({}))
        .await
        .expect("create");
    assert_eq!(
        storage.get_task(task_id).await.expect("row").status,
        TaskStatus::Created
    );

    manager.start(task_id).await.expect("start");
    manager.join(task_id).await.expect("join");

    let row = storage.get_task(task_id).await.expect("row");
    assert_eq!(row.status, TaskStatus::Completed);
    assert_eq!(
        row.progress.pointer("/cursor/after").and_then(serde_json::Value::as_i64),
        Some(40)
    );
}

#[tokio::test]
async fn pause_persists_cursor_and_resume_continues() {
    let (manager, storage, _dir) = manager_with(registry_with_slow_count()).await;
    let task_id = manager
        .create("slow-count", serde_json::json!({}))
        .await
        .expect("create");
    manager.start(task_id).await.expect("start");
    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.pause(task_id).await.expect("pause");

    let row = storage.get_task(task_id).await.expect("row");
    assert_eq!(row.status, TaskStatus::Paused);
    let paused_at = row
        .progress
        .pointer("/cursor/after")
        .and_then(serde_json::Value::as_i64)
        .expect("cursor persisted");
    assert!((1..40).contains(&paused_at), "cursor {paused_at} out of range");

    manager.resume(task_id).await.expect("resume");
    manager.join(task_id).await.expect("join");
    let row = storage.get_task(task_id).await.expect("row");
    assert_eq!(row.status, TaskStatus::Completed);
}

#[tokio::test]
async fn stop_is_terminal() {
    let (manager, storage, _dir) = manager_with(registry_with_slow_count()).await;
    let task_id = manager
        .create("slow-count", serde_json::json!({}))
        .await
        .expect("create");
    manager.start(task_id).await.expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.stop(task_id).await.expect("stop");

    let row = storage.get_task(task_id).await.expect("row");
    assert_eq!(row.status, TaskStatus::Stopped);
    // A stopped task is not startable again.
    let restart = manager.start(task_id).await;
    assert!(matches!(
        restart,
        Err(CrawlError::PreconditionFailed { code: "task-not-startable", .. })
    ));
}

#[tokio::test]
async fn restart_rehydrates_running_to_paused() {
    let (manager, storage, _dir) = manager_with(registry_with_slow_count()).await;
    let task_id = manager
        .create("slow-count", serde_json::json!({}))
        .await
        .expect("create");
    // Simulate a crash: the row says running but no process owns it.
    storage
        .set_task_status(task_id, TaskStatus::Running)
        .await
        .expect("mark running");

    let rehydrated = manager.rehydrate().await.expect("rehydrate");
    assert_eq!(rehydrated, vec![task_id]);
    assert_eq!(
        storage.get_task(task_id).await.expect("row").status,
        TaskStatus::Paused
    );
}

#[tokio::test]
async fn compress_task_recompresses_stored_content() {
    let (manager, storage, _dir) = manager_with(TaskRegistry::with_builtins()).await;
    let body = b"<html><body>repetitive content ".repeat(64);
    let content_ref = storage
        .put_content(body.clone(), CompressionPreset::Gzip(1))
        .await
        .expect("put");

    let task_id = manager
        .create("compress", serde_json::json!({ "preset": "zstd-3" }))
        .await
        .expect("create");
    manager.start(task_id).await.expect("start");
    manager.join(task_id).await.expect("join");

    assert_eq!(
        storage.get_task(task_id).await.expect("row").status,
        TaskStatus::Completed
    );
    let stored = storage.get_content(content_ref).await.expect("get");
    assert_eq!(stored.bytes, body, "bytes survive the preset change");
    assert_eq!(stored.compression, CompressionPreset::Zstd(3));
}
