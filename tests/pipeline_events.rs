//! Event handling tests: row capture, table filtering and malformed input
//!
//! Events are built byte for byte, including the CRC32 trailer, and fed to
//! the controller through the scripted source.

mod common;

use std::time::Duration;

use common::*;

#[test]
fn test_inserts_and_updates_reach_index() {
    let h = Harness::new();
    let v1 = vector(1.0);
    let v2 = vector(2.0);
    let v3 = vector(3.0);
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector.push(write_rows(
        PRODUCTS_TABLE_ID,
        500,
        &[(1, v1.as_slice()), (2, v2.as_slice())],
    ));
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 700));
    h.connector.push(update_rows(
        PRODUCTS_TABLE_ID,
        900,
        &[(1, v1.as_slice(), v3.as_slice())],
    ));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    // Only the after image of an update is kept.
    assert_eq!(h.index.get(1), Some(v3));
    assert_eq!(h.index.get(2), Some(v2));

    let stats = h.controller.stats();
    assert_eq!(stats.rows_enqueued, 3);
    assert_eq!(stats.rows_applied + stats.rows_superseded, 3);
    assert_eq!(stats.table_maps, 2);
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(stats.apply_failures, 0);
}

#[test]
fn test_untracked_table_rows_are_ignored() {
    let h = Harness::new();
    let v = vector(1.0);
    h.connector
        .push(table_map(ORDERS_TABLE_ID, "shop", "orders", 300));
    h.connector
        .push(write_rows(ORDERS_TABLE_ID, 500, &[(7, v.as_slice())]));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(h.index.len(), 0);
    let stats = h.controller.stats();
    assert_eq!(stats.table_maps, 0);
    assert_eq!(stats.rows_enqueued, 0);
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(h.controller.current_coordinates().pos, 500);
}

#[test]
fn test_truncated_untracked_table_map_is_not_an_error() {
    let h = Harness::new();
    let v = vector(4.0);
    h.connector
        .push(truncated_table_map(ORDERS_TABLE_ID, "shop", "orders", 300));
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 500));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 700, &[(1, v.as_slice())]));

    h.controller.start().expect("start");
    assert!(wait_for(Duration::from_secs(5), || h.index.len() == 1));
    h.controller.stop();

    assert_eq!(h.controller.stats().decode_errors, 0);
}

#[test]
fn test_multi_table_statement() {
    let h = Harness::new();
    let order = vector(1.0);
    let product = vector(2.0);
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 200));
    h.connector
        .push(table_map(ORDERS_TABLE_ID, "shop", "orders", 300));
    h.connector.push(write_rows_continued(
        ORDERS_TABLE_ID,
        400,
        &[(8, order.as_slice())],
    ));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 500, &[(5, product.as_slice())]));
    // The statement ended, so its table id is no longer bound.
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 600, &[(6, product.as_slice())]));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(h.index.get(5), Some(product));
    assert_eq!(h.index.get(6), None);
    assert_eq!(h.index.get(8), None);
    assert_eq!(h.index.len(), 1);
}

#[test]
fn test_corrupt_event_is_skipped() {
    let h = Harness::new();
    let v = vector(1.0);
    let mut corrupt = write_rows(PRODUCTS_TABLE_ID, 500, &[(1, v.as_slice())]);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;

    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector.push(corrupt);
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 700));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 900, &[(2, v.as_slice())]));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(h.index.get(1), None);
    assert_eq!(h.index.get(2), Some(v));
    assert_eq!(h.controller.stats().decode_errors, 1);
    assert!(!h.controller.is_running());
}

#[test]
fn test_other_events_are_counted_and_ignored() {
    let h = Harness::new();
    h.connector.push(format_description(0));
    h.connector.push(format_description(120));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    assert!(wait_for(Duration::from_secs(5), || {
        h.controller.stats().events_ignored == 2
    }));
    h.controller.stop();

    // The artificial description (log_pos 0) does not move the position.
    assert_eq!(h.controller.current_coordinates().pos, 120);
    assert_eq!(h.controller.stats().decode_errors, 0);
}

#[test]
fn test_stream_without_checksums() {
    let h = Harness::new();
    let v1 = vector(1.0);
    let v2 = vector(2.0);
    h.connector.push(format_description_with_alg(120, 0));
    h.connector.push(without_checksum(table_map(
        PRODUCTS_TABLE_ID,
        "shop",
        "products",
        300,
    )));
    h.connector.push(without_checksum(write_rows(
        PRODUCTS_TABLE_ID,
        500,
        &[(1, v1.as_slice())],
    )));
    h.connector.push(without_checksum(table_map(
        PRODUCTS_TABLE_ID,
        "shop",
        "products",
        700,
    )));
    h.connector.push(without_checksum(update_rows(
        PRODUCTS_TABLE_ID,
        900,
        &[(1, v1.as_slice(), v2.as_slice())],
    )));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    assert!(wait_for(Duration::from_secs(5), || {
        h.index.get(1).as_deref() == Some(v2.as_slice())
    }));
    h.controller.stop();

    let stats = h.controller.stats();
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(stats.table_maps, 2);
    assert_eq!(stats.events_ignored, 1);
    assert_eq!(h.controller.current_coordinates().pos, 900);
}

#[test]
fn test_checksums_resume_after_new_format_description() {
    let h = Harness::new();
    let v = vector(3.0);
    h.connector.push(format_description_with_alg(120, 0));
    h.connector.push(format_description(200));
    h.connector
        .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", 300));
    h.connector
        .push(write_rows(PRODUCTS_TABLE_ID, 500, &[(4, v.as_slice())]));

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    assert!(wait_for(Duration::from_secs(5), || h.index.len() == 1));
    h.controller.stop();

    assert_eq!(h.index.get(4), Some(v));
    assert_eq!(h.controller.stats().decode_errors, 0);
}

#[test]
fn test_same_row_last_write_wins() {
    let mut config = test_stream_config();
    config.worker_threads = 4;
    let h = Harness::build(config, CountingIndex::new("shop.products.embedding"));

    let versions: Vec<Vec<u8>> = (0..50).map(|n| vector(n as f32)).collect();
    let mut log_pos = 300;
    for version in &versions {
        h.connector
            .push(table_map(PRODUCTS_TABLE_ID, "shop", "products", log_pos));
        h.connector
            .push(write_rows(PRODUCTS_TABLE_ID, log_pos + 100, &[(42, version.as_slice())]));
        log_pos += 200;
    }

    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(h.index.get(42), versions.last().cloned());
    let stats = h.controller.stats();
    assert_eq!(stats.rows_enqueued, 50);
    assert_eq!(stats.rows_applied + stats.rows_superseded, 50);
}

#[test]
fn test_untracked_index_without_incremental_support() {
    let h = Harness::new();
    let bulk_only = std::sync::Arc::new(
        CountingIndex::new("shop.orders.embedding").without_incremental_updates(),
    );
    h.indexes
        .register("shop", "orders", "embedding", bulk_only.clone());

    let tracked = h
        .controller
        .register_tracked_table(
            "shop",
            "orders",
            vecsync::TrackedTable::new("embedding", 1, 3),
        )
        .expect("index exists");
    assert!(!tracked);

    let v = vector(1.0);
    h.connector
        .push(table_map(ORDERS_TABLE_ID, "shop", "orders", 300));
    h.connector
        .push(write_rows(ORDERS_TABLE_ID, 500, &[(1, v.as_slice())]));
    h.controller.start().expect("start");
    assert!(h.wait_for_script());
    h.controller.stop();

    assert_eq!(bulk_only.len(), 0);
}
