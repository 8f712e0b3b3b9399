//! Tests for the caught-up predicate

use super::*;

#[test]
fn test_caught_up_when_both_threads_idle() {
    assert!(is_caught_up(Some(IO_THREAD_IDLE), Some(SQL_THREAD_IDLE)));
}

#[test]
fn test_not_caught_up_while_fetching() {
    assert!(!is_caught_up(
        Some("Queueing master event to the relay log"),
        Some(SQL_THREAD_IDLE)
    ));
}

#[test]
fn test_not_caught_up_while_applying() {
    assert!(!is_caught_up(
        Some(IO_THREAD_IDLE),
        Some("Reading event from the relay log")
    ));
}

#[test]
fn test_not_caught_up_with_missing_fields() {
    assert!(!is_caught_up(None, Some(SQL_THREAD_IDLE)));
    assert!(!is_caught_up(Some(IO_THREAD_IDLE), None));
    assert!(!is_caught_up(None, None));
}

#[test]
fn test_state_match_is_exact() {
    // Prefix or casing variants must not qualify
    assert!(!is_caught_up(
        Some("waiting for master to send event"),
        Some(SQL_THREAD_IDLE)
    ));
    assert!(!is_caught_up(
        Some("Waiting for master to send event; reconnecting"),
        Some(SQL_THREAD_IDLE)
    ));
}
