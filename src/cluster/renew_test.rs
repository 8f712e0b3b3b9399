//! Tests for the auto-renew task lifecycle

use super::*;
use std::net::Ipv4Addr;

fn client() -> Arc<ConsulClient> {
    // No sessions registered: renew_all is a no-op, so the task runs
    // without touching the network.
    Arc::new(ConsulClient::new(Ipv4Addr::LOCALHOST))
}

#[tokio::test]
async fn test_initially_not_running() {
    let task = RenewTask::new();
    assert!(!task.is_running());
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let task = RenewTask::new();
    task.stop().await;
    assert!(!task.is_running());
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let task = RenewTask::new();

    task.start(client()).await;
    assert!(task.is_running());

    task.stop().await;
    assert!(!task.is_running());
}

#[tokio::test]
async fn test_double_start_is_idempotent() {
    let task = RenewTask::new();

    task.start(client()).await;
    task.start(client()).await;
    assert!(task.is_running());

    // A single stop ends it; the second start spawned nothing.
    task.stop().await;
    assert!(!task.is_running());
}

#[tokio::test]
async fn test_restart_after_stop() {
    // Bootstrap toggles the task around restore and backup phases;
    // every cycle must work like the first.
    let task = RenewTask::new();

    for _ in 0..3 {
        task.start(client()).await;
        assert!(task.is_running());
        task.stop().await;
        assert!(!task.is_running());
    }
}
