// gul-store-sqlite/tests/store.rs
// ============================================================================
// Module: SQLite Fence Store Tests
// Description: Tests for fence CRUD, spatial queries, metadata, and the
//              fence-table/R-Tree consistency invariant.
// Purpose: Ensure the store keeps both tables atomically consistent across
//          every mutation path, including rollback.
// Dependencies: gul-store-sqlite, gul-core, rusqlite, tempfile
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    missing_docs,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use gul_core::BoundingBox;
use gul_core::FenceItem;
use gul_core::FenceType;
use gul_core::Geometry;
use gul_core::Manifest;
use gul_core::Point;
use gul_core::compute_sha256;
use gul_store_sqlite::SqliteStore;
use gul_store_sqlite::StoreConfig;
use gul_store_sqlite::StoreError;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

struct StoreFixture {
    _dir: TempDir,
    path: PathBuf,
    store: SqliteStore,
}

fn store_fixture() -> StoreFixture {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("fences.db");
    let store = SqliteStore::open(&StoreConfig::new(&path)).expect("open store");
    StoreFixture {
        _dir: dir,
        path,
        store,
    }
}

fn polygon_fence(id: &str, priority: u32) -> FenceItem {
    FenceItem {
        id: id.to_string(),
        fence_type: FenceType::TempRestriction,
        geometry: Geometry::Polygon {
            vertices: vec![
                Point { lat: 39.0, lon: 116.0 },
                Point { lat: 39.0, lon: 117.0 },
                Point { lat: 40.0, lon: 117.0 },
                Point { lat: 40.0, lon: 116.0 },
            ],
        },
        start_ts: 0,
        end_ts: 0,
        priority,
        max_altitude_m: 0,
        max_speed_mps: 0,
        name: format!("fence {id}"),
        description: String::new(),
        signature: vec![0xAB; 64],
        key_id: "deadbeefdeadbeefdeadbeefdeadbeef".to_string(),
    }
}

/// Reads the id set of the fence table and the rowid set of the R-Tree
/// through a raw connection, bypassing the store API.
fn table_and_index_rows(path: &PathBuf) -> (BTreeSet<i64>, BTreeSet<i64>) {
    let connection = rusqlite::Connection::open(path).expect("raw open");
    let mut stmt = connection.prepare("SELECT rowid FROM fences").expect("prepare");
    let fences: BTreeSet<i64> = stmt
        .query_map([], |row| row.get(0))
        .expect("query")
        .map(|r| r.expect("row"))
        .collect();
    let mut stmt = connection.prepare("SELECT rowid FROM fence_index").expect("prepare");
    let index: BTreeSet<i64> = stmt
        .query_map([], |row| row.get(0))
        .expect("query")
        .map(|r| r.expect("row"))
        .collect();
    (fences, index)
}

fn assert_index_consistent(fixture: &StoreFixture) {
    let (fences, index) = table_and_index_rows(&fixture.path);
    assert_eq!(fences, index, "fence table and spatial index diverged");
}

// ============================================================================
// SECTION: CRUD
// ============================================================================

#[test]
fn add_get_roundtrip() {
    let fixture = store_fixture();
    let fence = polygon_fence("a", 10);
    fixture.store.add_fence(&fence).expect("add");

    let loaded = fixture.store.get_fence("a").expect("get");
    assert_eq!(loaded, fence);
    assert_index_consistent(&fixture);
}

#[test]
fn get_missing_fence_is_not_found() {
    let fixture = store_fixture();
    assert!(matches!(
        fixture.store.get_fence("ghost"),
        Err(StoreError::FenceNotFound(_))
    ));
}

#[test]
fn update_missing_fence_does_not_insert() {
    let fixture = store_fixture();
    let fence = polygon_fence("a", 10);
    assert!(matches!(
        fixture.store.update_fence(&fence),
        Err(StoreError::FenceNotFound(_))
    ));
    assert!(fixture.store.list_fences().expect("list").is_empty());
    assert_index_consistent(&fixture);
}

#[test]
fn update_changes_row_and_index() {
    let fixture = store_fixture();
    let mut fence = polygon_fence("a", 10);
    fixture.store.add_fence(&fence).expect("add");

    // Move the fence somewhere else entirely.
    fence.geometry = Geometry::Bbox(BoundingBox {
        min_lat: 0.0,
        min_lon: 0.0,
        max_lat: 1.0,
        max_lon: 1.0,
    });
    fence.priority = 99;
    fixture.store.update_fence(&fence).expect("update");

    let loaded = fixture.store.get_fence("a").expect("get");
    assert_eq!(loaded.priority, 99);

    // The old location no longer matches; the new one does.
    assert!(fixture.store.query_point(39.5, 116.5).expect("query").is_empty());
    assert_eq!(fixture.store.query_point(0.5, 0.5).expect("query").len(), 1);
    assert_index_consistent(&fixture);
}

#[test]
fn delete_removes_both_tables() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("a", 10)).expect("add");
    fixture.store.add_fence(&polygon_fence("b", 20)).expect("add");

    fixture.store.delete_fence("a").expect("delete");
    assert!(matches!(
        fixture.store.get_fence("a"),
        Err(StoreError::FenceNotFound(_))
    ));
    assert!(matches!(
        fixture.store.delete_fence("a"),
        Err(StoreError::FenceNotFound(_))
    ));
    assert_eq!(fixture.store.list_fences().expect("list").len(), 1);
    assert_index_consistent(&fixture);
}

#[test]
fn duplicate_id_rejected() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("a", 10)).expect("add");
    assert!(fixture.store.add_fence(&polygon_fence("a", 20)).is_err());
    assert_index_consistent(&fixture);
}

#[test]
fn list_orders_by_priority_descending() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("low", 5)).expect("add");
    fixture.store.add_fence(&polygon_fence("high", 200)).expect("add");
    fixture.store.add_fence(&polygon_fence("mid", 50)).expect("add");

    let ids: Vec<String> =
        fixture.store.list_fences().expect("list").into_iter().map(|f| f.id).collect();
    assert_eq!(ids, vec!["high", "mid", "low"]);
}

// ============================================================================
// SECTION: Spatial Queries
// ============================================================================

#[test]
fn query_point_exact_tests_candidates() {
    let fixture = store_fixture();
    // A circle whose index bounds cover the query point but whose exact
    // geometry does not.
    let circle = FenceItem {
        geometry: Geometry::Circle {
            center: Point { lat: 39.5, lon: 116.5 },
            radius_m: 1_000.0,
        },
        ..polygon_fence("circle", 10)
    };
    fixture.store.add_fence(&circle).expect("add");

    // Inside the bounding box corner, outside the disc.
    let corner_lat = 39.5 + 1_000.0 / 111_000.0 * 0.95;
    let corner_lon = 116.5 + 1_000.0 / 111_000.0 * 0.95;
    assert!(fixture.store.query_point(corner_lat, corner_lon).expect("query").is_empty());

    // The center matches.
    assert_eq!(fixture.store.query_point(39.5, 116.5).expect("query").len(), 1);
}

#[test]
fn query_point_returns_all_matching_without_temporal_filter() {
    let fixture = store_fixture();
    let mut future = polygon_fence("future", 10);
    future.start_ts = i64::MAX - 1;
    fixture.store.add_fence(&future).expect("add");
    fixture.store.add_fence(&polygon_fence("now", 20)).expect("add");

    // Both geometric matches come back; activity filtering is the query
    // engine's job.
    let hits = fixture.store.query_point(39.5, 116.5).expect("query");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "now");
}

#[test]
fn query_bbox_returns_intersecting() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("beijing", 10)).expect("add");
    let far = FenceItem {
        geometry: Geometry::Bbox(BoundingBox {
            min_lat: -10.0,
            min_lon: -10.0,
            max_lat: -5.0,
            max_lon: -5.0,
        }),
        ..polygon_fence("faraway", 10)
    };
    fixture.store.add_fence(&far).expect("add");

    let hits = fixture
        .store
        .query_bbox(&BoundingBox {
            min_lat: 38.0,
            min_lon: 115.0,
            max_lat: 41.0,
            max_lon: 118.0,
        })
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "beijing");
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

#[test]
fn version_defaults_to_zero_and_roundtrips() {
    let fixture = store_fixture();
    assert_eq!(fixture.store.get_version().expect("get"), 0);
    fixture.store.set_version(42).expect("set");
    assert_eq!(fixture.store.get_version().expect("get"), 42);
}

#[test]
fn manifest_roundtrips() {
    let fixture = store_fixture();
    assert!(fixture.store.get_manifest().expect("get").is_none());

    let manifest = Manifest {
        version: 3,
        timestamp: 1_700_000_000,
        root_hash: compute_sha256(b"root"),
        delta_url: None,
        delta_size: None,
        delta_hash: None,
        snapshot_url: "/v3.bin".to_string(),
        snapshot_size: 128,
        snapshot_hash: compute_sha256(b"snapshot"),
        min_client_version: 1,
        message: "Version 3".to_string(),
        signature: vec![1; 64],
        key_id: "00".repeat(16),
    };
    fixture.store.set_manifest(&manifest).expect("set");
    assert_eq!(fixture.store.get_manifest().expect("get"), Some(manifest));
}

#[test]
fn corrupted_geometry_fails_closed() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("a", 10)).expect("add");

    let connection = rusqlite::Connection::open(&fixture.path).expect("raw open");
    connection
        .execute("UPDATE fences SET geometry_json = 'nonsense' WHERE id = 'a'", [])
        .expect("corrupt");

    assert!(matches!(
        fixture.store.get_fence("a"),
        Err(StoreError::CorruptedStore(_))
    ));
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

#[test]
fn transaction_rollback_leaves_everything_unchanged() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("keep", 10)).expect("add");
    fixture.store.set_version(7).expect("set version");

    let result: Result<(), StoreError> = fixture.store.with_transaction(|tx| {
        tx.replace_all_fences(&[polygon_fence("discard", 1)])?;
        tx.set_version(8)?;
        Err(StoreError::Invalid("simulated failure".to_string()))
    });
    assert!(result.is_err());

    let ids: Vec<String> =
        fixture.store.list_fences().expect("list").into_iter().map(|f| f.id).collect();
    assert_eq!(ids, vec!["keep"]);
    assert_eq!(fixture.store.get_version().expect("get"), 7);
    assert_index_consistent(&fixture);
}

#[test]
fn transaction_commit_applies_everything_atomically() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("old", 10)).expect("add");

    fixture
        .store
        .with_transaction(|tx| {
            tx.replace_all_fences(&[polygon_fence("new-a", 1), polygon_fence("new-b", 2)])?;
            tx.set_version(2)?;
            tx.set_snapshot_bytes(b"snapshot bytes")?;
            Ok(())
        })
        .expect("commit");

    let ids: BTreeSet<String> =
        fixture.store.list_fences().expect("list").into_iter().map(|f| f.id).collect();
    assert_eq!(ids, BTreeSet::from(["new-a".to_string(), "new-b".to_string()]));
    assert_eq!(fixture.store.get_version().expect("get"), 2);
    assert_eq!(
        fixture.store.get_snapshot_bytes().expect("get"),
        Some(b"snapshot bytes".to_vec())
    );
    assert_index_consistent(&fixture);
}

#[test]
fn mutation_sequences_preserve_index_invariant() {
    let fixture = store_fixture();
    for i in 0..8 {
        fixture.store.add_fence(&polygon_fence(&format!("f{i}"), i)).expect("add");
    }
    for i in (0..8).step_by(2) {
        fixture.store.delete_fence(&format!("f{i}")).expect("delete");
    }
    let mut moved = polygon_fence("f1", 100);
    moved.geometry = Geometry::Bbox(BoundingBox {
        min_lat: 10.0,
        min_lon: 10.0,
        max_lat: 11.0,
        max_lon: 11.0,
    });
    fixture.store.update_fence(&moved).expect("update");

    assert_eq!(fixture.store.list_fences().expect("list").len(), 4);
    assert_index_consistent(&fixture);
}

#[test]
fn concurrent_readers_query_in_parallel() {
    let fixture = store_fixture();
    for i in 0..16 {
        fixture.store.add_fence(&polygon_fence(&format!("f{i}"), i)).expect("add");
    }

    // Reads fan out across the reader pool; every thread sees the full,
    // committed dataset with no cross-reader interference.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = fixture.store.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                assert_eq!(store.list_fences().expect("list").len(), 16);
                assert_eq!(store.query_point(39.5, 116.5).expect("query").len(), 16);
                assert!(store.get_fence("f0").is_ok());
            }
        }));
    }
    for handle in handles {
        handle.join().expect("reader thread");
    }
    assert_index_consistent(&fixture);
}

#[test]
fn reads_during_open_transaction_observe_prior_state() {
    let fixture = store_fixture();
    fixture.store.add_fence(&polygon_fence("before", 10)).expect("add");

    let reader = fixture.store.clone();
    fixture
        .store
        .with_transaction(|tx| {
            tx.replace_all_fences(&[polygon_fence("after", 20)])?;
            // A concurrent reader still sees the pre-transaction dataset.
            let seen: Vec<String> =
                reader.list_fences().expect("list").into_iter().map(|f| f.id).collect();
            assert_eq!(seen, vec!["before"]);
            Ok(())
        })
        .expect("commit");

    let seen: Vec<String> =
        fixture.store.list_fences().expect("list").into_iter().map(|f| f.id).collect();
    assert_eq!(seen, vec!["after"]);
}
