//! Tests for error classification and the bounded retry wrapper.

use super::support::{MockRunner, temp_town, write_config, write_unreachable_config};
use crate::error::KeeperError;
use crate::retry::{
    MAX_ATTEMPTS, is_read_only_error, is_retryable_error, recover_read_only,
    run_script_with_retry,
};
use serial_test::serial;
use tokio::net::TcpListener;

#[test]
fn retryable_phrases_match_case_insensitively() {
    for message in [
        "database is read only",
        "Database Is Read Only",
        "server is in read only mode",
        "cannot update manifest: nbs store",
        "optimistic lock failed on database root update",
        "serialization failure, retry transaction",
        "Lock wait timeout exceeded",
        "Deadlock found when trying to get lock; try restarting transaction",
    ] {
        assert!(is_retryable_error(message), "{message:?}");
    }
}

#[test]
fn fatal_errors_are_not_retryable() {
    for message in [
        "syntax error at position 12",
        "table not found: issues",
        "column \"prio\" could not be found",
        "connection refused",
        "timeout waiting for response",
        "permission denied",
        "",
    ] {
        assert!(!is_retryable_error(message), "{message:?}");
    }
}

#[test]
fn read_only_classifier_is_narrower_than_retryable() {
    assert!(is_read_only_error("database is read only"));
    assert!(is_read_only_error("Cannot update manifest"));
    assert!(is_read_only_error("running in read only mode"));

    // Retryable, but not the read-only recovery path
    assert!(!is_read_only_error("lock wait timeout"));
    assert!(!is_read_only_error("serialization failure"));
    assert!(!is_read_only_error("try restarting transaction"));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success_takes_two_attempts() {
    let runner = MockRunner::with_responses(vec![
        Err("lock wait timeout".to_string()),
        Ok("done".to_string()),
    ]);

    let output = run_script_with_retry(&runner, None, "insert into t values (1);")
        .await
        .unwrap();
    assert_eq!(output, "done");
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_returns_immediately() {
    let runner = MockRunner::failing("syntax error near 'slect'");

    let err = run_script_with_retry(&runner, None, "slect 1;")
        .await
        .unwrap_err();
    assert_eq!(runner.call_count(), 1);
    assert!(err.downcast_ref::<KeeperError>().is_none());
    assert!(format!("{err:#}").contains("syntax error"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_wrapped() {
    let runner = MockRunner::failing("optimistic lock failed");

    let err = run_script_with_retry(&runner, Some("alpha"), "update t set x = 1;")
        .await
        .unwrap_err();
    assert_eq!(runner.call_count(), MAX_ATTEMPTS as usize);
    match err.downcast_ref::<KeeperError>() {
        Some(KeeperError::RetriesExhausted { attempts, last }) => {
            assert_eq!(*attempts, MAX_ATTEMPTS);
            assert!(last.contains("optimistic lock failed"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn recover_read_only_is_a_noop_without_a_server() {
    let (_dir, town) = temp_town();
    write_unreachable_config(&town);

    let runner = MockRunner::ok();
    let recovered = recover_read_only(&town, &runner).await.unwrap();
    assert!(!recovered);
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
#[serial]
async fn recover_read_only_clears_a_stuck_flag() {
    let (_dir, town) = temp_town();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    write_config(&town, &format!("port = {port}\n"));

    let runner = MockRunner::with_responses(vec![
        Ok("@@global.read_only\n1\n".to_string()),
        Ok(String::new()),
    ]);
    let recovered = recover_read_only(&town, &runner).await.unwrap();
    assert!(recovered);

    let scripts = runner.scripts();
    assert_eq!(scripts.len(), 2);
    assert!(scripts[1].contains("read_only = 0"));
}

#[tokio::test]
#[serial]
async fn recover_read_only_leaves_a_writable_server_alone() {
    let (_dir, town) = temp_town();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    write_config(&town, &format!("port = {port}\n"));

    let runner = MockRunner::with_responses(vec![Ok("@@global.read_only\n0\n".to_string())]);
    let recovered = recover_read_only(&town, &runner).await.unwrap();
    assert!(!recovered);
    assert_eq!(runner.call_count(), 1);
}
