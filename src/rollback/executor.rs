//! Rollback fix-up
//!
//! Applies a finalized `FixUpInfo` to the local node. Phases run in a fixed
//! order, each leaving the state the next one expects:
//!
//! 1. refetch authoritative documents from the sync source
//! 2. switch to unstable checkpoints (majority read concern off)
//! 3. check the sync source rollback id, write minValid
//! 4. drop indexes whose creation is rolled back, then unfinished ones
//! 5. drop collections whose creation is rolled back
//! 6. undo renames, clearing clashing names out of the way
//! 7. un-list rolled-back drop-pending collections
//! 8. resync collection options, then re-check rollback id and minValid
//! 9. re-create indexes whose drop is rolled back
//! 10. restart two-phase index builds
//! 11. delete or upsert each refetched document
//! 12. correct stable and initial data timestamps (majority read concern off)
//! 13. truncate the oplog after the common point
//! 14. correct appliedThrough (majority read concern off)
//! 15. invalidate auth, session, key and shard registry caches
//! 16. reload last applied and durable OpTimes from the oplog
//!
//! No lock is held on entry. Locks are taken per step and never held
//! across a phase boundary.

use std::cmp;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use super::config::ClusterRole;
use super::context::RollbackContext;
use super::doc_id::DocId;
use super::errors::{RollbackError, RollbackErrorKind, RollbackResult};
use super::fixup_info::{FixUpInfo, RenameCollectionInfo};
use super::interfaces::{
    DataConsistency, IndexState, ReplicationCoordinator, ReplicationProcess, RollbackSource,
};
use super::options::CollectionOptions;
use super::remove_saver::RemoveSaver;
use crate::document::{encoded_size, id_query, Document};
use crate::fail_point::{maybe_crash, points};
use crate::locks::LockMode;
use crate::observability::{log_event_with_fields, Event, Logger, ObservationScope};
use crate::oplog::{NamespaceString, OpTime, Timestamp};

/// Prefix of names used to move a clashing collection out of the way.
const TEMP_COLLECTION_PREFIX: &str = "rollback.tmp";
const TEMP_COLLECTION_SUFFIX_LEN: usize = 5;
const TEMP_COLLECTION_ATTEMPTS: usize = 100;

/// Authoritative version of each refetched document, grouped by collection.
/// An empty document means the sync source does not have it.
type GoodVersions = BTreeMap<Uuid, BTreeMap<DocId, Document>>;

/// Check that the sync source has not rolled back and record minValid.
///
/// Must run after every batch of reads from the sync source and before the
/// local writes that depend on them.
pub fn check_rbid_and_update_min_valid(
    ctx: &RollbackContext<'_>,
    rbid: i32,
    source: &dyn RollbackSource,
    repl_process: &dyn ReplicationProcess,
) -> RollbackResult<()> {
    // Order matters: read the top of their oplog, then confirm it came from
    // the same history, then persist it.
    let new_min_valid_doc = source.last_operation()?;
    if new_min_valid_doc.is_empty() {
        return Err(RollbackError::min_valid_missing(
            "rollback error newest oplog entry on source is missing or empty",
        ));
    }
    if rbid != source.rollback_id()? {
        return Err(RollbackError::rollback_id_changed(
            "rollback rbid on source changed during rollback, canceling this attempt",
        ));
    }

    let min_valid = OpTime::parse_from_oplog_entry(&new_min_valid_doc).map_err(|e| {
        RollbackError::fatal(format!("cannot parse minValid from sync source: {}", e.message))
    })?;
    Logger::info("ROLLBACK_SETTING_MIN_VALID", &[("min_valid", &min_valid.to_string())]);

    if ctx.services.storage_engine.supports_recover_to_stable_timestamp() {
        return Err(RollbackError::invariant(
            "rollback via refetch requires a storage engine without recover to stable timestamp",
        ));
    }
    let markers = repl_process.consistency_markers();
    markers.clear_applied_through(Timestamp::null());
    markers.set_min_valid(min_valid);
    log_event_with_fields(Event::MinValidUpdated, &[("min_valid", &min_valid.to_string())]);

    if ctx
        .fail_points
        .should_fail(points::ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID)
    {
        Logger::info(
            "ROLLBACK_FAIL_POINT_HANG",
            &[("fail_point", points::ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID)],
        );
        ctx.pause_while_set(points::ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID)?;
        return Err(RollbackError::fail_point(
            "failing rollback due to rollbackHangThenFailAfterWritingMinValid fail point",
        ));
    }
    Ok(())
}

/// Undo every local change recorded in `info`.
pub fn sync_fix_up(
    ctx: &RollbackContext<'_>,
    info: &FixUpInfo,
    source: &dyn RollbackSource,
    repl_coord: &dyn ReplicationCoordinator,
    repl_process: &dyn ReplicationProcess,
) -> RollbackResult<()> {
    if ctx.locker.is_locked() {
        return Err(RollbackError::invariant("fix-up must start with no locks held"));
    }
    let storage = ctx.services.storage_engine;

    let good_versions = refetch_documents(ctx, info, source)?;

    // From here on a stable checkpoint could capture a fix-up write without
    // the write it undoes. Unstable checkpoints capture both.
    if !ctx.config.enable_majority_read_concern {
        Logger::info("ROLLBACK_ALLOW_UNSTABLE_CHECKPOINTS", &[]);
        storage.set_initial_data_timestamp(Timestamp::ALLOW_UNSTABLE_CHECKPOINTS_SENTINEL);
    }

    Logger::info("ROLLBACK_CHECKING_RBID", &[]);
    check_rbid_and_update_min_valid(ctx, info.rbid, source, repl_process)?;

    if info.common_point_our_disk_loc.is_null() {
        return Err(RollbackError::invariant("common point record id is null"));
    }

    // Created indexes go first: a re-created index may reuse a name.
    let scope = ObservationScope::new("ROLLBACK_DROP_CREATED_INDEXES");
    for (uuid, names) in &info.indexes_to_drop {
        rollback_create_indexes(ctx, *uuid, names)?;
    }
    // Unfinished indexes block collection drops.
    for (uuid, names) in &info.unfinished_indexes_to_drop {
        rollback_create_indexes(ctx, *uuid, names)?;
    }
    scope.complete();

    let scope = ObservationScope::new("ROLLBACK_DROP_CREATED_COLLECTIONS");
    for uuid in &info.collections_to_drop {
        rollback_create_collection(ctx, info, *uuid)?;
    }
    scope.complete();

    if ctx
        .fail_points
        .should_fail(points::ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP)
    {
        Logger::info(
            "ROLLBACK_FAIL_POINT_EXIT_EARLY",
            &[("fail_point", points::ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP)],
        );
        return Ok(());
    }

    let scope = ObservationScope::new("ROLLBACK_UNDO_RENAMES");
    for (uuid, rename) in &info.collections_to_rename {
        rollback_rename_collection(ctx, *uuid, rename)?;
    }
    scope.complete();

    // The collections must exist again before their metadata and documents
    // are touched.
    for (uuid, (op_time, nss)) in &info.collections_to_remove_from_drop_pending_collections {
        let listed = ctx
            .services
            .drop_pending_reaper
            .roll_back_drop_pending_collection(*op_time, nss);
        Logger::trace(
            "ROLLBACK_DROP_PENDING_COLLECTION_RESTORED",
            &[
                ("ns", &nss.ns()),
                ("op_time", &op_time.to_string()),
                ("uuid", &uuid.to_string()),
                ("was_listed", if listed { "true" } else { "false" }),
            ],
        );
    }

    if !info.collections_to_resync_metadata.is_empty() {
        let scope = ObservationScope::new("ROLLBACK_RESYNC_METADATA");
        for uuid in &info.collections_to_resync_metadata {
            resync_collection_metadata(ctx, *uuid, source)?;
        }
        scope.complete();

        // New reads from the sync source were made.
        Logger::info("ROLLBACK_RECHECKING_RBID", &[]);
        check_rbid_and_update_min_valid(ctx, info.rbid, source, repl_process)?;
    }

    let scope = ObservationScope::new("ROLLBACK_RECREATE_DROPPED_INDEXES");
    for (uuid, indexes) in &info.indexes_to_create {
        rollback_drop_indexes(ctx, *uuid, indexes)?;
    }
    scope.complete();

    Logger::info(
        "ROLLBACK_RESTARTING_INDEX_BUILDS",
        &[("builds", &info.index_builds_to_restart.len().to_string())],
    );
    ctx.services
        .index_builds
        .restart_index_builds_for_recovery(&info.index_builds_to_restart);

    fix_up_documents(ctx, info, &good_versions)?;

    if !ctx.config.enable_majority_read_concern {
        // The stable timestamp may be ahead of the common point.
        Logger::info(
            "ROLLBACK_FORCING_STABLE_TIMESTAMP",
            &[("timestamp", &info.common_point.ts.to_string())],
        );
        storage.set_stable_timestamp(info.common_point.ts, true);

        // No stable checkpoint until both our old top and their top (minValid)
        // are covered.
        let source_top = OpTime::parse_from_oplog_entry(&source.last_operation()?)
            .map_err(|e| {
                RollbackError::fatal(format!(
                    "cannot parse sync source top of oplog: {}",
                    e.message
                ))
            })?
            .ts;
        let initial_data_timestamp = cmp::max(info.local_top_of_oplog.ts, source_top);
        Logger::info(
            "ROLLBACK_SETTING_INITIAL_DATA_TIMESTAMP",
            &[
                ("local_top", &info.local_top_of_oplog.ts.to_string()),
                ("sync_source_top", &source_top.to_string()),
            ],
        );
        storage.set_initial_data_timestamp(initial_data_timestamp);

        Logger::info("ROLLBACK_WAITING_FOR_UNSTABLE_CHECKPOINT", &[]);
        storage.wait_until_unjournaled_writes_durable(false);
    }

    truncate_oplog(ctx, info)?;

    if !ctx.config.enable_majority_read_concern {
        // Recovery from the unstable checkpoint replays everything after the
        // common point.
        let markers = repl_process.consistency_markers();
        Logger::info(
            "ROLLBACK_SETTING_APPLIED_THROUGH",
            &[("op_time", &info.common_point.to_string())],
        );
        markers.set_applied_through(info.common_point, false);

        Logger::info("ROLLBACK_WAITING_FOR_UNSTABLE_CHECKPOINT", &[]);
        storage.wait_until_unjournaled_writes_durable(false);

        Logger::info("ROLLBACK_CLEARING_APPLIED_THROUGH", &[]);
        markers.clear_applied_through(Timestamp::null());
    }

    ctx.services.auth.initialize().map_err(|e| {
        let message = format!("Failed to reinitialize auth data after rollback: {}", e);
        Logger::fatal("ROLLBACK_AUTH_REINITIALIZE_FAILED", &[("error", &message)]);
        RollbackError::fatal(message)
    })?;

    if info.refetch_transaction_docs {
        ctx.services.sessions.invalidate_all_sessions();
    }

    if let Some(key_manager) = ctx.services.key_manager {
        key_manager.reset_key_manager_cache();
    }

    if ctx.config.cluster_role == ClusterRole::ConfigServer {
        if let Some(registry) = ctx.services.shard_registry {
            registry.clear_entries();
        }
    }

    // Data is consistent again only once minValid is reached.
    repl_coord.reset_last_op_times_from_oplog(DataConsistency::Inconsistent);
    Ok(())
}

fn refetch_documents(
    ctx: &RollbackContext<'_>,
    info: &FixUpInfo,
    source: &dyn RollbackSource,
) -> RollbackResult<GoodVersions> {
    let scope = ObservationScope::new("ROLLBACK_REFETCH");
    let catalog = ctx.services.catalog;
    let mut good_versions = GoodVersions::new();
    let mut total_size: u64 = 0;
    let mut num_fetched: u64 = 0;
    let total = info.docs_to_refetch.len().to_string();

    for doc in &info.docs_to_refetch {
        let nss = catalog.lookup_nss_by_uuid(doc.uuid);
        let db = nss.as_ref().map(|n| n.db().to_string()).unwrap_or_default();
        Logger::trace(
            "ROLLBACK_REFETCHING_DOCUMENT",
            &[
                ("id", &doc.id.to_string()),
                ("ns", &nss.as_ref().map(NamespaceString::ns).unwrap_or_default()),
                ("uuid", &doc.uuid.to_string()),
            ],
        );
        num_fetched += 1;

        let (good, resolved_nss) = match source.find_one_by_uuid(&db, doc.uuid, &id_query(&doc.id)) {
            Ok(found) => found,
            // Dropped or turned into a view upstream; oplog replay will do
            // the same here.
            Err(e)
                if matches!(
                    e.kind,
                    RollbackErrorKind::NamespaceNotFound
                        | RollbackErrorKind::CommandNotSupportedOnView
                ) =>
            {
                continue
            }
            Err(e) => {
                Logger::info(
                    "ROLLBACK_REFETCH_FAILED",
                    &[
                        ("error", &e.to_string()),
                        ("fetched", &num_fetched.to_string()),
                        ("id", &doc.id.to_string()),
                        ("total", &total),
                        ("uuid", &doc.uuid.to_string()),
                    ],
                );
                return Err(e);
            }
        };

        // A transactions table with another name or identity upstream means
        // its documents cannot be rolled back consistently.
        if Some(doc.uuid) == info.transaction_table_uuid
            && resolved_nss != NamespaceString::session_transactions_table()
        {
            return Err(RollbackError::fatal(format!(
                "A fetch on the transactions collection returned an unexpected namespace: {}. \
                 The transactions collection cannot be correctly rolled back, a full resync is \
                 required.",
                resolved_nss
            )));
        }

        let size = encoded_size(&good) as u64;
        total_size = total_size.saturating_add(size);
        if total_size >= ctx.config.max_refetch_bytes {
            return Err(RollbackError::fatal("replSet too much data to roll back."));
        }
        ctx.metrics.record_refetch(size);

        good_versions
            .entry(doc.uuid)
            .or_default()
            .insert(doc.clone(), good);
    }

    let documents: usize = good_versions.values().map(BTreeMap::len).sum();
    log_event_with_fields(
        Event::DocumentsRefetched,
        &[
            ("bytes", &total_size.to_string()),
            ("documents", &documents.to_string()),
        ],
    );
    scope.complete();
    Ok(good_versions)
}

/// Drop one index, finished or not. Failures are reported, not returned.
fn drop_index(ctx: &RollbackContext<'_>, uuid: Uuid, name: &str, nss: &NamespaceString) {
    let catalog = ctx.services.catalog;
    let ns = nss.ns();
    let result = match catalog.find_index(uuid, name) {
        None => {
            Logger::warn(
                "ROLLBACK_DROP_INDEX_NOT_FOUND",
                &[("index", name), ("ns", &ns)],
            );
            return;
        }
        Some(IndexState::Ready) => catalog.drop_index(uuid, name),
        Some(IndexState::Unfinished) => catalog.drop_unfinished_index(uuid, name),
    };

    match result {
        Ok(()) => ctx.metrics.increment_indexes_dropped(),
        Err(e) => Logger::error(
            "ROLLBACK_DROP_INDEX_FAILED",
            &[("error", &e.to_string()), ("index", name), ("ns", &ns)],
        ),
    }
}

fn rollback_create_indexes(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    names: &BTreeSet<String>,
) -> RollbackResult<()> {
    let nss = ctx.services.catalog.lookup_nss_by_uuid(uuid).ok_or_else(|| {
        RollbackError::invariant(format!("no collection with UUID {} to drop indexes from", uuid))
    })?;
    let _lock = ctx.locker.lock_db(nss.db(), LockMode::Exclusive);

    for name in names {
        Logger::info(
            "ROLLBACK_DROPPING_INDEX",
            &[("index", name), ("ns", &nss.ns()), ("uuid", &uuid.to_string())],
        );
        drop_index(ctx, uuid, name, &nss);
    }
    Ok(())
}

fn rollback_drop_indexes(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    indexes: &BTreeMap<String, Document>,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let nss = catalog.lookup_nss_by_uuid(uuid).ok_or_else(|| {
        RollbackError::invariant(format!("no collection with UUID {} to create indexes on", uuid))
    })?;
    let _lock = ctx
        .locker
        .lock_collection(&nss, LockMode::IntentExclusive, LockMode::Exclusive);

    for (name, spec) in indexes {
        Logger::info(
            "ROLLBACK_CREATING_INDEX",
            &[("index", name), ("ns", &nss.ns()), ("uuid", &uuid.to_string())],
        );
        catalog.create_index(uuid, spec)?;
        ctx.metrics.increment_indexes_created();
    }
    Ok(())
}

fn rollback_create_collection(
    ctx: &RollbackContext<'_>,
    info: &FixUpInfo,
    uuid: Uuid,
) -> RollbackResult<()> {
    // Everything else scheduled on a dropped collection was purged when the
    // common point was found.
    let still_scheduled = info.indexes_to_drop.contains_key(&uuid)
        || info.indexes_to_create.contains_key(&uuid)
        || info.collections_to_rename.contains_key(&uuid)
        || info.collections_to_resync_metadata.contains(&uuid)
        || info
            .index_builds_to_restart
            .values()
            .any(|build| build.coll_uuid == uuid);
    if still_scheduled {
        return Err(RollbackError::invariant(format!(
            "collection {} is dropped but still has rollback work scheduled",
            uuid
        )));
    }

    let catalog = ctx.services.catalog;
    let Some(nss) = catalog.lookup_nss_by_uuid(uuid) else {
        Logger::info(
            "ROLLBACK_DROP_COLLECTION_MISSING",
            &[("uuid", &uuid.to_string())],
        );
        return Ok(());
    };

    Logger::info(
        "ROLLBACK_DROPPING_COLLECTION",
        &[("ns", &nss.ns()), ("uuid", &uuid.to_string())],
    );
    let _lock = ctx.locker.lock_db(nss.db(), LockMode::Exclusive);
    if catalog.database_exists(nss.db()) {
        drop_collection(ctx, &nss, uuid)?;
        Logger::trace(
            "ROLLBACK_DROPPED_COLLECTION",
            &[("ns", &nss.ns()), ("uuid", &uuid.to_string())],
        );
    }
    Ok(())
}

fn drop_collection(ctx: &RollbackContext<'_>, nss: &NamespaceString, uuid: Uuid) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;

    if ctx.config.create_rollback_data_files {
        let mut saver = RemoveSaver::new(&ctx.config.rollback_data_dir, &uuid.to_string());
        Logger::info(
            "ROLLBACK_ARCHIVING_CREATED_COLLECTION",
            &[
                ("file", &saver.file().display().to_string()),
                ("ns", &nss.ns()),
                ("uuid", &uuid.to_string()),
            ],
        );

        let documents = catalog.scan_collection(uuid).map_err(|e| {
            Logger::error(
                "ROLLBACK_ARCHIVE_SCAN_FAILED",
                &[("error", &e.to_string()), ("ns", &nss.ns())],
            );
            RollbackError::fatal("Rolling back createCollection failed. A full resync is necessary.")
        })?;
        for document in &documents {
            saver.going_to_delete(document).map_err(|e| {
                Logger::error(
                    "ROLLBACK_ARCHIVE_WRITE_FAILED",
                    &[("error", &e.to_string()), ("ns", &nss.ns())],
                );
                RollbackError::fatal(
                    "Rolling back createCollection. Failed to write document to remove saver file.",
                )
            })?;
        }
        let saved = saver.saved();
        saver
            .finish()
            .map_err(|e| RollbackError::fatal(format!("cannot sync rollback data file: {}", e)))?;
        if saved > 0 {
            log_event_with_fields(
                Event::RemovedDocumentsSaved,
                &[("documents", &saved.to_string()), ("ns", &nss.ns())],
            );
        }
    }

    // Dropped for good, not through the drop-pending protocol.
    catalog
        .drop_collection_even_if_system(nss)
        .map_err(|e| RollbackError::fatal(format!("failed to drop {}: {}", nss, e)))?;
    ctx.metrics.increment_collections_dropped();
    Ok(())
}

/// Pick an unused `rollback.tmpXXXXX` name in `db`.
fn make_unique_collection_namespace(
    ctx: &RollbackContext<'_>,
    db: &str,
) -> RollbackResult<NamespaceString> {
    let mut rng = rand::thread_rng();
    for _ in 0..TEMP_COLLECTION_ATTEMPTS {
        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(TEMP_COLLECTION_SUFFIX_LEN)
            .map(char::from)
            .collect();
        let candidate =
            NamespaceString::from_parts(db, &format!("{}{}", TEMP_COLLECTION_PREFIX, suffix));
        if ctx.services.catalog.lookup_uuid_by_nss(&candidate).is_none() {
            return Ok(candidate);
        }
    }
    Err(RollbackError::namespace_exists(format!(
        "cannot generate a unique collection name in {}",
        db
    )))
}

/// Move the collection holding `rename.rename_to` to a temporary name.
fn rename_out_of_the_way(
    ctx: &RollbackContext<'_>,
    rename: &RenameCollectionInfo,
    db: &str,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let clashing_uuid = catalog.lookup_uuid_by_nss(&rename.rename_to).ok_or_else(|| {
        RollbackError::invariant(format!("no collection holds {}", rename.rename_to))
    })?;

    // The generated name is only guaranteed free under an exclusive lock.
    if !ctx.locker.is_db_locked_for_mode(db, LockMode::Exclusive) {
        return Err(RollbackError::invariant(format!(
            "database {} must be locked exclusively to rename out of the way",
            db
        )));
    }

    let temp_nss = make_unique_collection_namespace(ctx, db).map_err(|e| {
        Logger::error(
            "ROLLBACK_TEMP_NAMESPACE_FAILED",
            &[("error", &e.to_string()), ("ns", &rename.rename_to.ns())],
        );
        RollbackError::fatal(
            "Unable to generate temporary namespace to rename collection out of the way.",
        )
    })?;

    Logger::trace(
        "ROLLBACK_RENAMING_OUT_OF_THE_WAY",
        &[
            ("from", &rename.rename_from.ns()),
            ("temp", &temp_nss.ns()),
            ("to", &rename.rename_to.ns()),
            ("uuid", &clashing_uuid.to_string()),
        ],
    );

    catalog
        .rename_collection_for_rollback(&temp_nss, clashing_uuid)
        .map_err(|e| {
            Logger::error(
                "ROLLBACK_RENAME_OUT_OF_THE_WAY_FAILED",
                &[
                    ("error", &e.to_string()),
                    ("ns", &rename.rename_to.ns()),
                    ("temp", &temp_nss.ns()),
                ],
            );
            RollbackError::fatal("Unable to rename collection out of the way")
        })
}

fn rollback_rename_collection(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    rename: &RenameCollectionInfo,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let db = rename.rename_from.db();
    Logger::info(
        "ROLLBACK_RENAMING_COLLECTION",
        &[
            ("from", &rename.rename_from.ns()),
            ("to", &rename.rename_to.ns()),
            ("uuid", &uuid.to_string()),
        ],
    );
    let _lock = ctx.locker.lock_db(db, LockMode::Exclusive);

    match catalog.rename_collection_for_rollback(&rename.rename_to, uuid) {
        Ok(()) => {}
        // Taken by a collection created or renamed after the common point.
        Err(e) if e.kind == RollbackErrorKind::NamespaceExists => {
            rename_out_of_the_way(ctx, rename, db)?;
            catalog
                .rename_collection_for_rollback(&rename.rename_to, uuid)
                .map_err(|e| {
                    Logger::error(
                        "ROLLBACK_RENAME_FAILED_TWICE",
                        &[
                            ("error", &e.to_string()),
                            ("from", &rename.rename_from.ns()),
                            ("to", &rename.rename_to.ns()),
                        ],
                    );
                    RollbackError::fatal(
                        "Rename collection failed to roll back twice. We were unable to rename \
                         the collection.",
                    )
                })?;
        }
        Err(e) => {
            Logger::error("ROLLBACK_RENAME_FAILED", &[("error", &e.to_string())]);
            return Err(RollbackError::fatal("Unable to rollback renameCollection command"));
        }
    }

    ctx.metrics.increment_collections_renamed();
    Ok(())
}

fn resync_collection_metadata(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    source: &dyn RollbackSource,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let nss = catalog.lookup_nss_by_uuid(uuid).ok_or_else(|| {
        RollbackError::invariant(format!("no collection with UUID {} to resync", uuid))
    })?;
    Logger::info(
        "ROLLBACK_RESYNCING_METADATA",
        &[("ns", &nss.ns()), ("uuid", &uuid.to_string())],
    );

    let info = match source.collection_info_by_uuid(nss.db(), uuid) {
        Ok(info) => info,
        // Dropped upstream: replay will drop it here too.
        Err(e) if e.kind == RollbackErrorKind::NamespaceNotFound => {
            Logger::info(
                "ROLLBACK_RESYNC_METADATA_SKIPPED",
                &[("ns", &nss.ns()), ("reason", "not found on sync source")],
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let rendered = Value::Object(info.clone()).to_string();

    let options = match info.get("options") {
        None => CollectionOptions::default(),
        Some(Value::Object(options)) => CollectionOptions::parse(options).map_err(|reason| {
            RollbackError::fatal(format!("Failed to parse options {}: {}", rendered, reason))
        })?,
        Some(other) => {
            return Err(RollbackError::fatal(format!(
                "Failed to parse options {}: expected 'options' to be an Object, got {}",
                rendered, other
            )))
        }
    };

    // Fetched without a lock; only the local change is made under one.
    let _lock = ctx.locker.lock_db(nss.db(), LockMode::Exclusive);

    // Copied verbatim: the source is the authority on these options.
    catalog.set_is_temp(uuid, options.temp)?;
    catalog
        .update_validator(
            uuid,
            &options.validator,
            options.validation_level,
            options.validation_action,
        )
        .map_err(|e| {
            RollbackError::fatal(format!(
                "Failed to update validator for {} ({}) with {}. Got: {}",
                nss, uuid, rendered, e
            ))
        })?;

    ctx.metrics.increment_metadata_resyncs();
    Logger::trace(
        "ROLLBACK_RESYNCED_METADATA",
        &[("ns", &nss.ns()), ("options", &Value::Object(options.to_document()).to_string())],
    );
    Ok(())
}

/// Delete a document from a capped collection by truncating from it on.
fn fix_up_capped_document(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    id: &Value,
    nss: &NamespaceString,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let started = Instant::now();
    let found = catalog.find_by_id(uuid, id)?;
    if started.elapsed() > ctx.config.slow_capped_find_threshold() {
        Logger::warn("ROLLBACK_SLOW_CAPPED_FIND", &[("ns", &nss.ns())]);
    }

    let Some((loc, _)) = found else {
        return Ok(());
    };
    match catalog.capped_truncate_after(uuid, loc, true) {
        Err(e) if e.kind == RollbackErrorKind::EmptiesCappedCollection => catalog.truncate(uuid),
        other => other,
    }
}

fn fix_up_documents(
    ctx: &RollbackContext<'_>,
    info: &FixUpInfo,
    good_versions: &GoodVersions,
) -> RollbackResult<()> {
    let scope = ObservationScope::new("ROLLBACK_FIX_UP_DOCUMENTS");
    let catalog = ctx.services.catalog;
    let total: usize = good_versions.values().map(BTreeMap::len).sum();
    let mut deletes: u64 = 0;
    let mut updates: u64 = 0;
    let mut last_progress = Instant::now();

    for (uuid, versions) in good_versions {
        let uuid = *uuid;
        if info.collections_to_drop.contains(&uuid) {
            return Err(RollbackError::invariant(format!(
                "documents refetched for dropped collection {}",
                uuid
            )));
        }
        let nss = catalog.lookup_nss_by_uuid(uuid).unwrap_or_default();

        let mut saver = if ctx.config.create_rollback_data_files {
            let saver = RemoveSaver::new(&ctx.config.rollback_data_dir, &uuid.to_string());
            Logger::info(
                "ROLLBACK_ARCHIVING_DOCUMENTS",
                &[
                    ("file", &saver.file().display().to_string()),
                    ("ns", &nss.ns()),
                    ("uuid", &uuid.to_string()),
                ],
            );
            Some(saver)
        } else {
            None
        };

        for (doc, good) in versions {
            if last_progress.elapsed() > ctx.config.progress_log_interval() {
                Logger::info(
                    "ROLLBACK_FIX_UP_PROGRESS",
                    &[
                        ("deletes", &deletes.to_string()),
                        ("total", &total.to_string()),
                        ("updates", &updates.to_string()),
                    ],
                );
                last_progress = Instant::now();
            }

            let result = fix_up_document(
                ctx,
                uuid,
                &nss,
                doc,
                good,
                saver.as_mut(),
                &mut deletes,
                &mut updates,
            );
            if let Err(e) = result {
                Logger::info(
                    "ROLLBACK_FIX_UP_DOCUMENT_FAILED",
                    &[
                        ("deletes", &deletes.to_string()),
                        ("error", &e.to_string()),
                        ("ns", &nss.ns()),
                        ("pattern", &Value::Object(id_query(&doc.id)).to_string()),
                    ],
                );
                return Err(e);
            }
        }

        if let Some(saver) = saver {
            let saved = saver.saved();
            saver
                .finish()
                .map_err(|e| RollbackError::fatal(format!("cannot sync rollback data file: {}", e)))?;
            if saved > 0 {
                log_event_with_fields(
                    Event::RemovedDocumentsSaved,
                    &[("documents", &saved.to_string()), ("ns", &nss.ns())],
                );
            }
        }
    }

    scope.complete_with_fields(&[
        ("deletes", &deletes.to_string()),
        ("updates", &updates.to_string()),
    ]);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn fix_up_document(
    ctx: &RollbackContext<'_>,
    uuid: Uuid,
    nss: &NamespaceString,
    doc: &DocId,
    good: &Document,
    saver: Option<&mut RemoveSaver>,
    deletes: &mut u64,
    updates: &mut u64,
) -> RollbackResult<()> {
    let catalog = ctx.services.catalog;
    let doc_nss = NamespaceString::new(&doc.ns);
    let _lock = ctx.locker.lock_db(doc_nss.db(), LockMode::Exclusive);
    let exists = catalog.lookup_nss_by_uuid(uuid).is_some();

    // A missing collection was dropped by rolling back its creation; its
    // documents went with it.
    if exists {
        if let Some(saver) = saver {
            match catalog.find_by_id(uuid, &doc.id)? {
                Some((_, current)) => saver.going_to_delete(&current).map_err(|e| {
                    Logger::error(
                        "ROLLBACK_ARCHIVE_WRITE_FAILED",
                        &[("error", &e.to_string()), ("ns", &nss.ns())],
                    );
                    RollbackError::fatal(format!(
                        "Rollback cannot write document in namespace {} to archive file.",
                        nss
                    ))
                })?,
                None => Logger::error(
                    "ROLLBACK_ARCHIVE_DOCUMENT_NOT_FOUND",
                    &[
                        ("ns", &nss.ns()),
                        ("pattern", &Value::Object(id_query(&doc.id)).to_string()),
                    ],
                ),
            }
        }
    }

    if good.is_empty() {
        Logger::trace(
            "ROLLBACK_DELETING_DOCUMENT",
            &[("id", &doc.id.to_string()), ("ns", &doc.ns), ("uuid", &uuid.to_string())],
        );
        *deletes += 1;
        ctx.metrics.increment_documents_deleted();

        if !exists {
            return Ok(());
        }
        if catalog.is_capped(uuid)? {
            // Capped collections rely on age-out to converge.
            if let Err(e) = fix_up_capped_document(ctx, uuid, &doc.id, nss) {
                Logger::warn(
                    "ROLLBACK_CAPPED_FIX_UP_IGNORED",
                    &[("error", &e.to_string()), ("id", &doc.id.to_string()), ("ns", &nss.ns())],
                );
                ctx.metrics.increment_capped_failures_ignored();
            }
            return Ok(());
        }
        catalog.delete_by_id(uuid, &doc.id)
    } else {
        Logger::trace(
            "ROLLBACK_UPDATING_DOCUMENT",
            &[("id", &doc.id.to_string()), ("ns", &doc.ns), ("uuid", &uuid.to_string())],
        );
        *updates += 1;
        ctx.metrics.increment_documents_updated();
        catalog.upsert_by_id(uuid, &doc.id, good)
    }
}

fn truncate_oplog(ctx: &RollbackContext<'_>, info: &FixUpInfo) -> RollbackResult<()> {
    let scope = ObservationScope::with_fields(
        "ROLLBACK_TRUNCATE_OPLOG",
        &[
            ("common_point", &info.common_point.to_string()),
            ("record_id", &info.common_point_our_disk_loc.to_string()),
        ],
    );
    maybe_crash(points::ROLLBACK_BEFORE_OPLOG_TRUNCATE);

    {
        let oplog_nss = NamespaceString::rs_oplog();
        let _lock = ctx.locker.lock_collection(
            &oplog_nss,
            LockMode::IntentExclusive,
            LockMode::Exclusive,
        );
        let oplog_uuid = ctx
            .services
            .catalog
            .lookup_uuid_by_nss(&oplog_nss)
            .ok_or_else(|| RollbackError::fatal(format!("Can't find {}", oplog_nss)))?;
        ctx.services
            .catalog
            .capped_truncate_after(oplog_uuid, info.common_point_our_disk_loc, false)?;
    }

    ctx.metrics.increment_oplog_truncations();
    log_event_with_fields(
        Event::OplogTruncated,
        &[("common_point", &info.common_point.to_string())],
    );
    maybe_crash(points::ROLLBACK_AFTER_OPLOG_TRUNCATE);
    scope.complete();
    Ok(())
}
