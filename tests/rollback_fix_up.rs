//! Rollback Fix-Up Tests
//!
//! End-to-end rollbacks of an in-memory node against an in-memory sync
//! source, asserting on the local node afterwards:
//! - Created collections are dropped, dropped indexes re-created
//! - Documents are deleted, restored or replaced by the source version
//! - Refetch volume is capped
//! - Capped collection failures do not abort rollback
//! - Renames, metadata, timestamps and rollback data files

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use oplog_rollback::document::Document;
use oplog_rollback::fail_point::points;
use oplog_rollback::locks::Locker;
use oplog_rollback::memory::{MemoryRollbackSource, SimulatedNodes};
use oplog_rollback::oplog::{NamespaceString, OpTime, Timestamp};
use oplog_rollback::rollback::interfaces::{
    Catalog, ConsistencyMarkers, MemberState, OplogInterface, ReplicationCoordinator,
    ReplicationProcess, RollbackSource,
};
use oplog_rollback::rollback::options::{ValidationAction, ValidationLevel};
use oplog_rollback::rollback::remove_saver::read_all;
use oplog_rollback::rollback::{
    sync_fix_up, RollbackConfig, RollbackContext, RollbackErrorKind, RollbackOutcome,
    RollbackResult,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Test Utilities
// =============================================================================

fn ns(s: &str) -> NamespaceString {
    NamespaceString::new(s)
}

fn documents(nodes: &SimulatedNodes, namespace: &str) -> Vec<Value> {
    nodes
        .services
        .catalog
        .documents(&ns(namespace))
        .into_iter()
        .map(Value::Object)
        .collect()
}

fn oplog_len(nodes: &SimulatedNodes) -> usize {
    nodes.services.catalog.documents(&NamespaceString::rs_oplog()).len()
}

/// Local node diverged after `common` with `local_only`, against a source
/// whose history ends at `common`.
fn diverged(common: u32, local_only: Vec<Value>, local: Value, remote: Value) -> SimulatedNodes {
    let mut local_oplog = shared_history(common);
    local_oplog.extend(local_only);
    build(json!({
        "local": {"collections": local, "oplog": local_oplog},
        "remote": {"collections": remote, "oplog": shared_history(common)},
    }))
}

/// Sync source that counts the fetches made while a lock is held.
struct LockCheckingSource<'a> {
    inner: &'a MemoryRollbackSource,
    locker: &'a Locker,
    fetches: AtomicUsize,
    fetches_under_lock: AtomicUsize,
}

impl<'a> LockCheckingSource<'a> {
    fn new(inner: &'a MemoryRollbackSource, locker: &'a Locker) -> Self {
        Self {
            inner,
            locker,
            fetches: AtomicUsize::new(0),
            fetches_under_lock: AtomicUsize::new(0),
        }
    }

    fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.locker.is_locked() {
            self.fetches_under_lock.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl RollbackSource for LockCheckingSource<'_> {
    fn source(&self) -> String {
        self.inner.source()
    }

    fn rollback_id(&self) -> RollbackResult<i32> {
        self.record_fetch();
        self.inner.rollback_id()
    }

    fn last_operation(&self) -> RollbackResult<Document> {
        self.record_fetch();
        self.inner.last_operation()
    }

    fn oplog(&self) -> &dyn OplogInterface {
        self.inner.oplog()
    }

    fn find_one_by_uuid(
        &self,
        db: &str,
        uuid: Uuid,
        filter: &Document,
    ) -> RollbackResult<(Document, NamespaceString)> {
        self.record_fetch();
        self.inner.find_one_by_uuid(db, uuid, filter)
    }

    fn collection_info_by_uuid(&self, db: &str, uuid: Uuid) -> RollbackResult<Document> {
        self.record_fetch();
        self.inner.collection_info_by_uuid(db, uuid)
    }
}

/// An insert made inside session `session` with transaction number 4.
fn transactional_insert(secs: u32, ns: &str, ui: &str, o: Value, session: &str) -> Value {
    let mut entry = insert(secs, ns, ui, o);
    entry["lsid"] = json!({"id": session});
    entry["txnNumber"] = json!(4);
    entry
}

fn assert_completed(nodes: &SimulatedNodes, outcome: RollbackOutcome, common: u32) {
    assert_eq!(outcome, RollbackOutcome::Completed);
    assert_eq!(nodes.coordinator.member_state(), MemberState::Recovering);
    assert_eq!(nodes.process.rollback_id(), 1);
    assert_eq!(oplog_len(nodes), common as usize);
    assert_eq!(nodes.coordinator.my_last_applied_op_time(), op_time(common));
}

// =============================================================================
// Collection and index DDL
// =============================================================================

#[test]
fn test_created_collection_is_dropped() {
    let nodes = diverged(
        4,
        vec![
            command(5, "test", UUID_T, json!({"create": "t"})),
            insert(6, "test.t", UUID_T, json!({"_id": 1})),
        ],
        json!([
            collection("test.t", UUID_T, json!([{"_id": 1}])),
            collection("test.c", UUID_C, json!([{"_id": 1}])),
        ]),
        json!([collection("test.c", UUID_C, json!([{"_id": 1}]))]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 4);
    let catalog = &nodes.services.catalog;
    assert!(catalog.lookup_uuid_by_nss(&ns("test.t")).is_none());
    assert!(catalog.lookup_nss_by_uuid(uuid(UUID_T)).is_none());
    assert_eq!(documents(&nodes, "test.c"), vec![json!({"_id": 1})]);

    let metrics = nodes.metrics.snapshot();
    assert_eq!(metrics.collections_dropped, 1);
    assert_eq!(metrics.documents_refetched, 0);
    assert_eq!(metrics.documents_deleted, 0);
    assert_eq!(metrics.indexes_dropped, 0);
}

#[test]
fn test_dropped_index_is_recreated() {
    let spec = json!({"key": {"a": 1}, "name": "a_1", "v": 2});
    let drop = with_o2(
        command(7, "test", UUID_C, json!({"dropIndexes": "c", "index": "a_1"})),
        spec.clone(),
    );
    let nodes = diverged(
        6,
        vec![drop],
        json!([collection("test.c", UUID_C, json!([]))]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 6);
    assert_eq!(
        nodes.services.catalog.index_spec(uuid(UUID_C), "a_1"),
        Some(doc(spec))
    );
    assert_eq!(nodes.metrics.snapshot().indexes_created, 1);
}

#[test]
fn test_created_index_is_dropped() {
    let create = command(
        7,
        "test",
        UUID_C,
        json!({"createIndexes": "c", "key": {"b": 1}, "name": "b_1", "v": 2}),
    );
    let mut local = collection("test.c", UUID_C, json!([]));
    local["indexes"] = json!([{"key": {"b": 1}, "name": "b_1", "v": 2}]);
    let nodes = diverged(
        6,
        vec![create],
        json!([local]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 6);
    assert!(nodes.services.catalog.index_spec(uuid(UUID_C), "b_1").is_none());
    assert_eq!(nodes.metrics.snapshot().indexes_dropped, 1);
}

// =============================================================================
// Documents
// =============================================================================

#[test]
fn test_insert_missing_upstream_is_deleted() {
    let nodes = diverged(
        8,
        vec![insert(9, "test.c", UUID_C, json!({"_id": 1, "x": "local"}))],
        json!([collection("test.c", UUID_C, json!([{"_id": 1, "x": "local"}, {"_id": 2}]))]),
        json!([collection("test.c", UUID_C, json!([{"_id": 2}]))]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert_eq!(documents(&nodes, "test.c"), vec![json!({"_id": 2})]);
    assert_eq!(nodes.metrics.snapshot().documents_deleted, 1);
}

#[test]
fn test_update_and_delete_take_source_version() {
    let nodes = diverged(
        8,
        vec![
            update(9, "test.c", UUID_C, json!(1), json!({"$set": {"x": "local"}})),
            delete(10, "test.c", UUID_C, json!(2)),
        ],
        json!([collection("test.c", UUID_C, json!([{"_id": 1, "x": "local"}]))]),
        json!([collection(
            "test.c",
            UUID_C,
            json!([{"_id": 1, "x": "remote"}, {"_id": 2, "y": true}])
        )]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    let mut restored = documents(&nodes, "test.c");
    restored.sort_by_key(|d| d["_id"].as_i64());
    assert_eq!(
        restored,
        vec![json!({"_id": 1, "x": "remote"}), json!({"_id": 2, "y": true})]
    );
    assert_eq!(nodes.metrics.snapshot().documents_updated, 2);
}

#[test]
fn test_refetch_cap_stops_before_fix_up() {
    let big = "x".repeat(256);
    let local_docs = json!([{"_id": 1}, {"_id": 2}]);
    let nodes = diverged(
        8,
        vec![
            update(9, "test.c", UUID_C, json!(1), json!({"$set": {"a": 1}})),
            update(10, "test.c", UUID_C, json!(2), json!({"$set": {"a": 1}})),
        ],
        json!([collection("test.c", UUID_C, local_docs.clone())]),
        json!([collection(
            "test.c",
            UUID_C,
            json!([{"_id": 1, "pad": big}, {"_id": 2, "pad": big}])
        )]),
    );
    let config = RollbackConfig {
        max_refetch_bytes: 400,
        ..RollbackConfig::default()
    };

    let err = run(&nodes, config).unwrap_err();

    assert_eq!(err.kind, RollbackErrorKind::Fatal);
    assert!(err.message.contains("too much data"));
    // Nothing local changed besides the rollback id.
    assert_eq!(documents(&nodes, "test.c"), local_docs.as_array().unwrap().clone());
    assert_eq!(oplog_len(&nodes), 10);
    assert!(nodes.process.markers().min_valid().is_null());
    assert_eq!(nodes.coordinator.member_state(), MemberState::Rollback);
    assert_eq!(nodes.metrics.snapshot().fatal_failures, 1);
}

// =============================================================================
// Capped collections
// =============================================================================

fn capped_nodes() -> SimulatedNodes {
    let mut local = collection("test.cap", UUID_C, json!([{"_id": 1}, {"_id": 2}, {"_id": 3}]));
    local["capped"] = json!(true);
    let mut remote = collection("test.cap", UUID_C, json!([{"_id": 1}]));
    remote["capped"] = json!(true);
    diverged(
        8,
        vec![
            insert(9, "test.cap", UUID_C, json!({"_id": 2})),
            insert(10, "test.cap", UUID_C, json!({"_id": 3})),
        ],
        json!([local]),
        json!([remote]),
    )
}

#[test]
fn test_capped_documents_are_truncated() {
    let nodes = capped_nodes();

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert_eq!(documents(&nodes, "test.cap"), vec![json!({"_id": 1})]);
}

#[test]
fn test_capped_truncate_failure_is_tolerated() {
    let nodes = capped_nodes();
    nodes.services.catalog.set_fail_capped_truncate(true);

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert_eq!(documents(&nodes, "test.cap").len(), 3);
    let metrics = nodes.metrics.snapshot();
    assert_eq!(metrics.capped_failures_ignored, 2);
    assert_eq!(metrics.documents_deleted, 2);
}

#[test]
fn test_capped_truncate_of_first_document_empties_collection() {
    let mut local = collection("test.cap", UUID_C, json!([{"_id": 1}]));
    local["capped"] = json!(true);
    let mut remote = collection("test.cap", UUID_C, json!([]));
    remote["capped"] = json!(true);
    let nodes = diverged(
        8,
        vec![insert(9, "test.cap", UUID_C, json!({"_id": 1}))],
        json!([local]),
        json!([remote]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert!(documents(&nodes, "test.cap").is_empty());
}

// =============================================================================
// Renames and metadata
// =============================================================================

/// Forward: c renamed a -> b, then other renamed x -> a. Undoing c's rename
/// first finds a taken and moves other out of the way.
#[test]
fn test_rename_into_occupied_name() {
    let nodes = diverged(
        8,
        vec![
            command(9, "test", UUID_C, json!({"renameCollection": "test.a", "to": "test.b"})),
            command(10, "test", UUID_OTHER, json!({"renameCollection": "test.x", "to": "test.a"})),
        ],
        json!([
            collection("test.b", UUID_C, json!([])),
            collection("test.a", UUID_OTHER, json!([])),
        ]),
        json!([
            collection("test.a", UUID_C, json!([])),
            collection("test.x", UUID_OTHER, json!([])),
        ]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    let catalog = &nodes.services.catalog;
    assert_eq!(catalog.lookup_nss_by_uuid(uuid(UUID_C)), Some(ns("test.a")));
    assert_eq!(catalog.lookup_nss_by_uuid(uuid(UUID_OTHER)), Some(ns("test.x")));
    let metrics = nodes.metrics.snapshot();
    assert_eq!(metrics.collections_renamed, 2);
    assert_eq!(metrics.metadata_resyncs, 2);
}

#[test]
fn test_coll_mod_resyncs_validator() {
    let mut local = collection("test.c", UUID_C, json!([]));
    local["options"] = json!({"validator": {"x": {"$exists": true}}, "validationLevel": "strict"});
    let mut remote = collection("test.c", UUID_C, json!([]));
    remote["options"] = json!({
        "validator": {"x": {"$type": "string"}},
        "validationLevel": "moderate",
        "validationAction": "warn",
    });
    let nodes = diverged(
        8,
        vec![command(
            9,
            "test",
            UUID_C,
            json!({"collMod": "c", "validator": {"x": {"$exists": true}}}),
        )],
        json!([local]),
        json!([remote]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    let options = nodes.services.catalog.options(uuid(UUID_C)).unwrap();
    assert_eq!(options.validator, doc(json!({"x": {"$type": "string"}})));
    assert_eq!(options.validation_level, ValidationLevel::Moderate);
    assert_eq!(options.validation_action, ValidationAction::Warn);
    assert!(!options.temp);
}

#[test]
fn test_resync_skips_collection_dropped_upstream() {
    let nodes = diverged(
        8,
        vec![command(
            9,
            "test",
            UUID_C,
            json!({"collMod": "c", "validationAction": "warn"}),
        )],
        json!([collection("test.c", UUID_C, json!([]))]),
        json!([]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert_eq!(nodes.metrics.snapshot().metadata_resyncs, 0);
}

#[test]
fn test_two_phase_drop_is_undone() {
    let drop_time = op_time(9);
    let pending = ns("test.c").make_drop_pending_namespace(drop_time);
    let mut local_oplog = shared_history(8);
    local_oplog.push(command(9, "test", UUID_C, json!({"drop": "c"})));
    let nodes = build(json!({
        "local": {
            "collections": [collection(&pending.ns(), UUID_C, json!([{"_id": 1}]))],
            "oplog": local_oplog,
        },
        "remote": {
            "collections": [collection("test.c", UUID_C, json!([{"_id": 1}]))],
            "oplog": shared_history(8),
        },
        "drop_pending": [{"op_time": drop_time, "ns": "test.c"}],
    }));

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert_eq!(
        nodes.services.catalog.lookup_nss_by_uuid(uuid(UUID_C)),
        Some(ns("test.c"))
    );
    assert!(nodes.services.drop_pending_reaper.pending().is_empty());
    assert_eq!(documents(&nodes, "test.c"), vec![json!({"_id": 1})]);
}

// =============================================================================
// Timestamps without majority read concern
// =============================================================================

#[test]
fn test_unstable_checkpoints_without_majority_read_concern() {
    let mut remote_oplog = shared_history(8);
    remote_oplog.push(noop(12));
    let mut local_oplog = shared_history(8);
    local_oplog.push(insert(9, "test.c", UUID_C, json!({"_id": 1})));
    let nodes = build(json!({
        "local": {
            "collections": [collection("test.c", UUID_C, json!([{"_id": 1}]))],
            "oplog": local_oplog,
        },
        "remote": {
            "collections": [collection("test.c", UUID_C, json!([]))],
            "oplog": remote_oplog,
        },
    }));
    let config = RollbackConfig {
        enable_majority_read_concern: false,
        ..RollbackConfig::default()
    };

    let outcome = run(&nodes, config).unwrap();

    assert_completed(&nodes, outcome, 8);
    let engine = &nodes.services.storage_engine;
    assert_eq!(engine.stable_timestamp(), Some(Timestamp::new(8, 1)));
    // The larger of our old top (9) and theirs (12).
    assert_eq!(engine.initial_data_timestamp(), Some(Timestamp::new(12, 1)));
    assert_eq!(engine.unstable_checkpoints(), 2);

    let markers = nodes.process.markers();
    assert_eq!(markers.min_valid(), op_time(12));
    assert!(markers.applied_through().is_null());
    let writes = markers.applied_through_writes();
    assert!(writes.contains(&(op_time(8), false)));
    assert_eq!(writes.last(), Some(&(OpTime::null(), false)));
}

#[test]
fn test_majority_read_concern_leaves_timestamps_alone() {
    let nodes = diverged(
        8,
        vec![insert(9, "test.c", UUID_C, json!({"_id": 1}))],
        json!([collection("test.c", UUID_C, json!([{"_id": 1}]))]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    let engine = &nodes.services.storage_engine;
    assert!(engine.stable_timestamp().is_none());
    assert!(engine.initial_data_timestamp().is_none());
    assert_eq!(engine.unstable_checkpoints(), 0);
    assert_eq!(engine.durable_waits(), 1);
}

#[test]
fn test_sync_source_is_never_queried_under_a_lock() {
    let nodes = diverged(
        8,
        vec![
            insert(9, "test.c", UUID_C, json!({"_id": 1})),
            command(10, "test", UUID_C, json!({"collMod": "c", "validationLevel": "moderate"})),
        ],
        json!([collection("test.c", UUID_C, json!([{"_id": 1}]))]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );
    let info = plan(&nodes).unwrap();
    let ctx = RollbackContext::new(nodes.services.services(), RollbackConfig::default());
    let source = LockCheckingSource::new(&nodes.source, &ctx.locker);

    sync_fix_up(&ctx, &info, &source, &nodes.coordinator, &nodes.process).unwrap();

    // The document refetch, the metadata resync and the rbid checks.
    assert!(source.fetches.load(Ordering::SeqCst) >= 3);
    assert_eq!(source.fetches_under_lock.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.metrics.snapshot().metadata_resyncs, 1);
    assert!(!ctx.locker.is_locked());
    assert!(documents(&nodes, "test.c").is_empty());
}

// =============================================================================
// Sessions
// =============================================================================

const SESSION: &str = "d1b3a7f0-5c2e-4f8a-9b6d-2e4c8a1f7b3d";

#[test]
fn test_transactional_insert_restores_session_row() {
    let nodes = diverged(
        8,
        vec![transactional_insert(9, "test.c", UUID_C, json!({"_id": 1}), SESSION)],
        json!([
            collection("test.c", UUID_C, json!([{"_id": 1}])),
            collection(
                "config.transactions",
                UUID_OTHER,
                json!([{"_id": {"id": SESSION}, "txnNum": 4}])
            ),
        ]),
        json!([
            collection("test.c", UUID_C, json!([])),
            collection(
                "config.transactions",
                UUID_OTHER,
                json!([{"_id": {"id": SESSION}, "txnNum": 3}])
            ),
        ]),
    );

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_completed(&nodes, outcome, 8);
    assert!(documents(&nodes, "test.c").is_empty());
    assert_eq!(
        documents(&nodes, "config.transactions"),
        vec![json!({"_id": {"id": SESSION}, "txnNum": 3})]
    );
    assert_eq!(nodes.services.invalidations.session_invalidations(), 1);
}

#[test]
fn test_transactions_table_renamed_upstream_is_fatal() {
    let nodes = diverged(
        8,
        vec![transactional_insert(9, "test.c", UUID_C, json!({"_id": 1}), SESSION)],
        json!([
            collection("test.c", UUID_C, json!([{"_id": 1}])),
            collection(
                "config.transactions",
                UUID_OTHER,
                json!([{"_id": {"id": SESSION}, "txnNum": 4}])
            ),
        ]),
        json!([
            collection("test.c", UUID_C, json!([])),
            collection("config.sessions_old", UUID_OTHER, json!([])),
        ]),
    );

    let err = run(&nodes, RollbackConfig::default()).unwrap_err();

    assert_eq!(err.kind, RollbackErrorKind::Fatal);
    assert!(err.message.contains("config.sessions_old"));
    // Nothing local was touched.
    assert_eq!(documents(&nodes, "test.c"), vec![json!({"_id": 1})]);
    assert_eq!(
        documents(&nodes, "config.transactions"),
        vec![json!({"_id": {"id": SESSION}, "txnNum": 4})]
    );
    assert_eq!(oplog_len(&nodes), 9);
    assert_eq!(nodes.services.invalidations.session_invalidations(), 0);
}

// =============================================================================
// Rollback data files
// =============================================================================

#[test]
fn test_removed_documents_are_archived() {
    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let nodes = diverged(
        4,
        vec![
            command(5, "test", UUID_T, json!({"create": "t"})),
            insert(6, "test.t", UUID_T, json!({"_id": "t1"})),
            insert(7, "test.c", UUID_C, json!({"_id": "c1", "v": 1})),
        ],
        json!([
            collection("test.t", UUID_T, json!([{"_id": "t1"}])),
            collection("test.c", UUID_C, json!([{"_id": "c1", "v": 1}])),
        ]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );
    let config = RollbackConfig {
        create_rollback_data_files: true,
        rollback_data_dir: data_dir.path().to_path_buf(),
        ..RollbackConfig::default()
    };

    let outcome = run(&nodes, config).unwrap();
    assert_completed(&nodes, outcome, 4);

    let archived = |ui: &str| -> Vec<Value> {
        let dir = data_dir.path().join(ui);
        let mut saved = Vec::new();
        for entry in fs::read_dir(&dir).expect("archive directory exists") {
            let path = entry.unwrap().path();
            saved.extend(read_all(&path).unwrap().into_iter().map(Value::Object));
        }
        saved
    };
    assert_eq!(archived(UUID_T), vec![json!({"_id": "t1"})]);
    assert_eq!(archived(UUID_C), vec![json!({"_id": "c1", "v": 1})]);
}

#[test]
fn test_no_archive_by_default() {
    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let nodes = diverged(
        8,
        vec![insert(9, "test.c", UUID_C, json!({"_id": 1}))],
        json!([collection("test.c", UUID_C, json!([{"_id": 1}]))]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );
    let config = RollbackConfig {
        rollback_data_dir: data_dir.path().to_path_buf(),
        ..RollbackConfig::default()
    };

    run(&nodes, config).unwrap();
    assert_eq!(fs::read_dir(data_dir.path()).unwrap().count(), 0);
}

// =============================================================================
// Fail points
// =============================================================================

#[test]
fn test_exit_early_after_collection_drop() {
    let mut local_oplog = shared_history(4);
    local_oplog.push(command(5, "test", UUID_T, json!({"create": "t"})));
    let nodes = build(json!({
        "local": {
            "collections": [collection("test.t", UUID_T, json!([]))],
            "oplog": local_oplog,
        },
        "remote": {"oplog": shared_history(4)},
        "fail_points": [points::ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP],
    }));

    let outcome = run(&nodes, RollbackConfig::default()).unwrap();

    assert_eq!(outcome, RollbackOutcome::RetryLater);
    assert!(nodes.services.catalog.lookup_nss_by_uuid(uuid(UUID_T)).is_none());
    // The oplog was never truncated.
    assert_eq!(oplog_len(&nodes), 5);
    assert_eq!(nodes.coordinator.member_state(), MemberState::Recovering);
}

#[test]
fn test_hang_then_fail_after_writing_min_valid() {
    let nodes = diverged(
        8,
        vec![insert(9, "test.c", UUID_C, json!({"_id": 1}))],
        json!([collection("test.c", UUID_C, json!([{"_id": 1}]))]),
        json!([collection("test.c", UUID_C, json!([]))]),
    );
    nodes
        .fail_points
        .enable(points::ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID);

    let fail_points = Arc::clone(&nodes.fail_points);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        fail_points.disable(points::ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID);
    });
    let config = RollbackConfig {
        fail_point_poll_interval_ms: 10,
        ..RollbackConfig::default()
    };

    let outcome = run(&nodes, config).unwrap();
    releaser.join().unwrap();

    assert_eq!(outcome, RollbackOutcome::RetryLater);
    assert_eq!(nodes.process.markers().min_valid(), op_time(8));
    // Fix-up never reached the documents.
    assert_eq!(documents(&nodes, "test.c"), vec![json!({"_id": 1})]);
    assert_eq!(oplog_len(&nodes), 9);
}
