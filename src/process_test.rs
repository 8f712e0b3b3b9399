//! Tests for subprocess helpers
#![allow(clippy::unwrap_used)]

use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_run_success() {
    run("true", std::iter::empty::<&str>()).await.unwrap();
}

#[tokio::test]
async fn test_run_nonzero_exit_is_error() {
    let err = run("false", std::iter::empty::<&str>()).await.unwrap_err();
    assert!(matches!(err, ProcessError::Failed { .. }));
    assert!(err.to_string().contains("false"));
}

#[tokio::test]
async fn test_run_missing_binary_is_spawn_error() {
    let err = run("/nonexistent/definitely-not-a-binary", ["x"])
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
}

#[tokio::test]
async fn test_output_captures_stdout() {
    let out = output("echo", ["hello"]).await.unwrap();
    assert_eq!(out.trim(), "hello");
}

#[tokio::test]
async fn test_supervised_observes_exit_once() {
    let child = spawn("true", std::iter::empty::<&str>()).unwrap();
    let mut supervised = Supervised::new("test-child", child);

    // The child exits on its own; poll until the exit is observed.
    let mut waited = Duration::ZERO;
    while !supervised.has_exited() && waited < Duration::from_secs(5) {
        supervised.poll();
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(supervised.has_exited());

    // Further polls stay quiet and keep the state latched.
    supervised.poll();
    assert!(supervised.has_exited());
}
