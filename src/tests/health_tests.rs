//! Tests for health metrics and fail-closed admission control.

use super::support::{MockRunner, temp_town, write_config, write_unreachable_config};
use crate::error::KeeperError;
use crate::health::{
    check_server_reachable, disk_usage, get_health_metrics, has_connection_capacity,
};
use serial_test::serial;
use std::fs;
use tokio::net::TcpListener;

#[test]
fn disk_usage_counts_nested_files() {
    let (_dir, town) = temp_town();
    let root = town.dolt_data_root();
    fs::create_dir_all(root.join("alpha").join("deep")).unwrap();
    fs::write(root.join("alpha").join("a"), vec![0u8; 100]).unwrap();
    fs::write(root.join("alpha").join("deep").join("b"), vec![0u8; 28]).unwrap();

    assert_eq!(disk_usage(&root), 128);
}

#[tokio::test]
#[serial]
async fn unreachable_server_yields_absent_probes_not_errors() {
    let (_dir, town) = temp_town();
    write_unreachable_config(&town);

    let runner = MockRunner::ok();
    let metrics = get_health_metrics(&town, &runner).await.unwrap();

    assert_eq!(metrics.data_dir_bytes, 0);
    assert_eq!(metrics.data_dir_human, "0 B");
    assert_eq!(metrics.connections, None);
    assert_eq!(metrics.latency, None);
    assert_eq!(metrics.read_only, None);
    assert_eq!(metrics.max_connections, 50);
    // No probes were even attempted
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
#[serial]
async fn reachable_server_is_probed_for_connections_and_read_only() {
    let (_dir, town) = temp_town();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    write_config(&town, &format!("port = {port}\nconnect_timeout_ms = 500\n"));

    let runner = MockRunner::with_responses(vec![
        Ok("1\n1\n".to_string()),                          // ping
        Ok("count(*)\n3\n".to_string()),                   // connection count
        Ok("@@global.max_connections\n100\n".to_string()), // server limit
        Ok("@@global.read_only\n0\n".to_string()),         // read-only flag
    ]);

    let metrics = get_health_metrics(&town, &runner).await.unwrap();
    assert!(metrics.latency.is_some());
    assert_eq!(metrics.connections, Some(3));
    assert_eq!(metrics.max_connections, 100);
    assert_eq!(metrics.read_only, Some(false));
}

#[tokio::test]
#[serial]
async fn configured_connection_limit_is_not_overridden() {
    let (_dir, town) = temp_town();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    write_config(
        &town,
        &format!("port = {port}\nconnect_timeout_ms = 500\nmax_connections = 8\n"),
    );

    let runner = MockRunner::with_responses(vec![
        Ok("1\n1\n".to_string()),
        Ok("count(*)\n3\n".to_string()),
        // No max_connections query expected; next response feeds read_only
        Ok("@@global.read_only\n1\n".to_string()),
    ]);

    let metrics = get_health_metrics(&town, &runner).await.unwrap();
    assert_eq!(metrics.max_connections, 8);
    assert_eq!(metrics.read_only, Some(true));
    assert_eq!(runner.call_count(), 3);
}

#[tokio::test]
#[serial]
async fn capacity_check_fails_closed_when_probe_fails() {
    let (_dir, town) = temp_town();
    write_unreachable_config(&town);

    let runner = MockRunner::failing("connection refused");
    let check = has_connection_capacity(&town, &runner).await.unwrap();

    assert!(!check.has_capacity);
    assert_eq!(check.current, None);
    assert!(check.error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
#[serial]
async fn capacity_check_compares_count_to_limit() {
    let (_dir, town) = temp_town();
    write_config(&town, "max_connections = 4\n");

    let below = MockRunner::with_responses(vec![Ok("count(*)\n3\n".to_string())]);
    let check = has_connection_capacity(&town, &below).await.unwrap();
    assert!(check.has_capacity);
    assert_eq!(check.current, Some(3));
    assert_eq!(check.limit, 4);

    let at_limit = MockRunner::with_responses(vec![Ok("count(*)\n4\n".to_string())]);
    let check = has_connection_capacity(&town, &at_limit).await.unwrap();
    assert!(!check.has_capacity);
}

#[tokio::test]
#[serial]
async fn capacity_check_rejects_unparseable_counts() {
    let (_dir, town) = temp_town();
    write_config(&town, "max_connections = 4\n");

    let runner = MockRunner::with_responses(vec![Ok("garbage".to_string())]);
    let check = has_connection_capacity(&town, &runner).await.unwrap();
    assert!(!check.has_capacity);
    assert!(check.error.is_some());
}

#[tokio::test]
#[serial]
async fn reachability_reports_the_address_that_failed() {
    let (_dir, town) = temp_town();
    write_unreachable_config(&town);

    let err = check_server_reachable(&town).await.unwrap_err();
    match err.downcast_ref::<KeeperError>() {
        Some(KeeperError::ServerUnreachable { addr, .. }) => {
            assert_eq!(addr, "127.0.0.1:1");
        }
        other => panic!("expected ServerUnreachable, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn reachability_succeeds_against_a_listening_socket() {
    let (_dir, town) = temp_town();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    write_config(&town, &format!("port = {port}\n"));

    check_server_reachable(&town).await.unwrap();
}
