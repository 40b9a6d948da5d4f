//! Startup, identity and reconnect tests for the binlog stream controller
//!
//! Every test drives a real `StreamController` against a scripted binlog
//! source; no MySQL server is involved.

mod common;

use std::time::Duration;

use common::*;
use vecsync::pipeline::StreamError;
use vecsync::StreamPhase;

#[test]
fn test_cold_start_dumps_from_earliest_log() {
    let h = Harness::new();
    h.controller.start().expect("start");

    assert_eq!(h.connector.dumps(), vec![("binlog.000001".to_string(), 4)]);
    assert_eq!(h.controller.phase(), StreamPhase::Streaming);
    assert_eq!(h.controller.server_uuid(), UUID_A);
    assert_eq!(
        h.controller.stable_coordinates().map(|c| c.file),
        Some("binlog.000001".to_string())
    );

    h.controller.stop();
    assert_eq!(h.controller.phase(), StreamPhase::Stopped);
    let saved = h.saved_checkpoint().expect("checkpoint written at shutdown");
    assert_eq!(saved.server_uuid, UUID_A);
    assert_eq!(saved.binlog_file, "binlog.000001");
    assert_eq!(saved.binlog_pos, 4);
}

#[test]
fn test_resume_dumps_from_checkpoint() {
    let h = Harness::new();
    h.seed_checkpoint(UUID_A, "binlog.000007", 1200);

    h.controller.start().expect("start");
    assert_eq!(h.connector.dumps(), vec![("binlog.000007".to_string(), 1200)]);

    let current = h.controller.current_coordinates();
    assert_eq!(current.file, "binlog.000007");
    assert_eq!(current.pos, 1200);
    h.controller.stop();
}

#[test]
fn test_resume_replays_rows_idempotently() {
    let h = Harness::new();
    h.seed_checkpoint(UUID_A, "binlog.000003", 4);
    let v = vector(1.0);
    h.connector.push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 500, &[(1, v.as_slice()), (2, v.as_slice())]));

    h.controller.start().expect("start");
    assert!(wait_for(Duration::from_secs(5), || h.index.len() == 2));
    h.controller.stop();

    // The checkpoint did not move past the rotation boundary, so a restart
    // replays the same rows and converges on the same index contents.
    let saved = h.saved_checkpoint().expect("checkpoint");
    assert_eq!((saved.binlog_file.as_str(), saved.binlog_pos), ("binlog.000003", 4));

    h.connector.push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 500, &[(1, v.as_slice()), (2, v.as_slice())]));
    h.controller.start().expect("restart");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(h.index.len(), 2);
    assert_eq!(h.index.get(1), Some(v.clone()));
    assert_eq!(
        h.connector.dumps(),
        vec![
            ("binlog.000003".to_string(), 4),
            ("binlog.000003".to_string(), 4)
        ]
    );
}

#[test]
fn test_identity_mismatch_refuses_to_stream() {
    let h = Harness::new();
    h.seed_checkpoint(UUID_B, "binlog.000002", 900);

    let err = h.controller.start().expect_err("identity mismatch");
    match err {
        StreamError::IdentityMismatch { persisted, live } => {
            assert_eq!(persisted, UUID_B);
            assert_eq!(live, UUID_A);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(h.connector.dumps().is_empty());
    assert!(!h.controller.is_running());
    assert_eq!(h.controller.phase(), StreamPhase::Stopped);

    let saved = h.saved_checkpoint().expect("checkpoint untouched");
    assert_eq!(saved.server_uuid, UUID_B);
    assert_eq!(saved.binlog_pos, 900);
}

#[test]
fn test_connect_retries_until_success() {
    let h = Harness::new();
    h.connector.script.lock().failing_connects = 2;

    h.controller.start().expect("start after retries");
    assert_eq!(h.connector.connect_attempts(), 3);
    assert_eq!(h.controller.phase(), StreamPhase::Streaming);
    h.controller.stop();
}

#[test]
fn test_connect_retries_exhausted() {
    let h = Harness::new();
    h.connector.script.lock().failing_connects = u32::MAX;

    match h.controller.start() {
        Err(StreamError::ConnectRetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, test_stream_config().max_connect_attempts);
            assert!(last_error.contains("connection refused"), "{last_error}");
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
    assert_eq!(
        h.connector.connect_attempts(),
        test_stream_config().max_connect_attempts
    );
    assert_eq!(h.controller.phase(), StreamPhase::Stopped);
    assert!(h.saved_checkpoint().is_none());
}

#[test]
fn test_reconnect_resumes_at_current_position() {
    let h = Harness::new();
    let v1 = vector(1.0);
    let v2 = vector(2.0);
    h.connector.push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector.push(write_rows(PRODUCTS_TABLE_ID, 500, &[(1, v1.as_slice())]));
    h.connector.push_disconnect();
    h.connector.push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 700));
    h.connector.push(write_rows(PRODUCTS_TABLE_ID, 900, &[(2, v2.as_slice())]));

    h.controller.start().expect("start");
    assert!(wait_for(Duration::from_secs(5), || h.index.len() == 2));

    assert_eq!(
        h.connector.dumps(),
        vec![
            ("binlog.000001".to_string(), 4),
            ("binlog.000001".to_string(), 500)
        ]
    );
    assert_eq!(h.connector.connect_attempts(), 2);
    assert_eq!(h.controller.stats().reconnects, 1);
    assert_eq!(h.controller.stats().decode_errors, 0);
    assert_eq!(h.controller.phase(), StreamPhase::Streaming);
    assert_eq!(h.controller.current_coordinates().pos, 900);
    h.controller.stop();
}

#[test]
fn test_reconnect_to_different_server_stops_pipeline() {
    let h = Harness::new();
    let v = vector(1.0);
    h.connector.push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector.push(write_rows(PRODUCTS_TABLE_ID, 500, &[(1, v.as_slice())]));
    h.connector.push_failover(UUID_B);

    h.controller.start().expect("start");
    assert!(wait_for(Duration::from_secs(5), || !h.controller.is_running()));

    assert_eq!(h.controller.phase(), StreamPhase::Stopped);
    assert_eq!(h.connector.dumps().len(), 1);
    assert_eq!(h.index.get(1), Some(v));

    // The checkpoint keeps naming the server it was taken from.
    let saved = h.saved_checkpoint().expect("checkpoint");
    assert_eq!(saved.server_uuid, UUID_A);
}
