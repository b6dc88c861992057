// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatcher lifecycle tests over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use readmill_dispatch::broker::{InMemoryBroker, TaskStatus};
use readmill_dispatch::dispatcher::TaskDispatcher;
use tempfile::TempDir;

fn task(category: &str, command: &str) -> String {
    format!(r#"{{"category": "{category}", "command": "{command}"}}"#)
}

fn dispatcher_over(broker: Arc<InMemoryBroker>, work_dir: &TempDir) -> TaskDispatcher {
    TaskDispatcher::new(broker, work_dir.path().to_path_buf())
}

// ============================================================================
// Lifecycle status events
// ============================================================================

#[tokio::test]
async fn test_completed_task_publishes_launched_then_completed() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[task("qc", "true").as_str()]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    let published = broker.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].task_id, 1);
    assert_eq!(published[0].status, TaskStatus::Launched);
    assert_eq!(published[1].task_id, 1);
    assert_eq!(published[1].status, TaskStatus::Completed);
    assert!(published[0].timestamp <= published[1].timestamp);
}

#[tokio::test]
async fn test_failing_command_publishes_failed() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[task("qc", "exit 3").as_str()]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    let published = broker.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].status, TaskStatus::Launched);
    assert_eq!(published[1].status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_launch_order_matches_arrival_order() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[
        task("qc", "true").as_str(),
        task("archive", "true").as_str(),
        task("qc", "true").as_str(),
    ]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    let launched: Vec<u64> = broker
        .published()
        .await
        .iter()
        .filter(|event| event.status == TaskStatus::Launched)
        .map(|event| event.task_id)
        .collect();
    assert_eq!(launched, vec![1, 2, 3]);

    // Each task reaches exactly one terminal state, after its launch.
    let published = broker.published().await;
    for id in 1..=3u64 {
        let launch = published
            .iter()
            .position(|e| e.task_id == id && e.status == TaskStatus::Launched)
            .unwrap();
        let terminal = published
            .iter()
            .position(|e| e.task_id == id && e.status != TaskStatus::Launched)
            .unwrap();
        assert!(launch < terminal);
    }
}

// ============================================================================
// Malformed messages
// ============================================================================

#[tokio::test]
async fn test_malformed_message_is_dropped_not_fatal() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[
        "this is not json",
        r#"{"category": "qc"}"#,
        task("qc", "true").as_str(),
    ]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    // Only the valid message got a task id and a lifecycle.
    let published = broker.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].task_id, 1);
    assert_eq!(published[0].status, TaskStatus::Launched);
    assert_eq!(published[1].status, TaskStatus::Completed);
}

// ============================================================================
// Task table
// ============================================================================

#[tokio::test]
async fn test_table_entry_lives_until_terminal_status() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[task("qc", "sleep 0.3").as_str()]));
    let dispatcher = Arc::new(dispatcher_over(broker.clone(), &work_dir));

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let mut seen_in_flight = false;
    for _ in 0..50 {
        if dispatcher.in_flight().await == 1 {
            seen_in_flight = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    run.await.unwrap().unwrap();

    assert!(seen_in_flight);
    assert_eq!(dispatcher.in_flight().await, 0);
    assert_eq!(broker.published().await.len(), 2);
}

// ============================================================================
// Command execution
// ============================================================================

#[tokio::test]
async fn test_command_output_lands_in_per_task_log() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[
        task("qc", "echo from-task-one").as_str(),
        task("qc", "echo from-task-two >&2").as_str(),
    ]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    let first = std::fs::read_to_string(work_dir.path().join("task-1.log")).unwrap();
    let second = std::fs::read_to_string(work_dir.path().join("task-2.log")).unwrap();
    assert!(first.contains("from-task-one"));
    assert!(second.contains("from-task-two"));
}

#[tokio::test]
async fn test_unlaunchable_command_is_reported_failed() {
    let work_dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::with_tasks(&[task(
        "qc",
        "readmill-no-such-program-anywhere",
    )
    .as_str()]));
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    // bash itself launches, then exits 127; either way the outcome
    // class is FAILED.
    let published = broker.published().await;
    assert_eq!(published[1].status, TaskStatus::Failed);
}

// ============================================================================
// Broker failures and shutdown
// ============================================================================

#[tokio::test]
async fn test_publish_failure_does_not_stop_execution() {
    let work_dir = TempDir::new().unwrap();
    let mut broker = InMemoryBroker::with_tasks(&[
        task("qc", "echo still-ran").as_str(),
        task("qc", "echo me-too").as_str(),
    ]);
    broker.publish_fails = true;
    let broker = Arc::new(broker);
    let dispatcher = dispatcher_over(broker.clone(), &work_dir);

    dispatcher.run().await.unwrap();

    // No statuses made it out, but both commands executed.
    assert_eq!(broker.published_count().await, 0);
    let first = std::fs::read_to_string(work_dir.path().join("task-1.log")).unwrap();
    let second = std::fs::read_to_string(work_dir.path().join("task-2.log")).unwrap();
    assert!(first.contains("still-ran"));
    assert!(second.contains("me-too"));
}

#[tokio::test]
async fn test_shutdown_interrupts_idle_receive() {
    let work_dir = TempDir::new().unwrap();
    let mut broker = InMemoryBroker::new();
    broker.block_when_empty = true;
    let dispatcher = Arc::new(dispatcher_over(Arc::new(broker), &work_dir));
    let shutdown = dispatcher.shutdown_handle();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.notify_one();

    let joined = tokio::time::timeout(Duration::from_secs(5), run).await;
    assert!(joined.is_ok());
}
