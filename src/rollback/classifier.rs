//! Classification of rolled-back local oplog entries
//!
//! Each local entry newer than the common point is translated into the work
//! needed to make local state look as if the entry had never been applied.
//! Document writes are not inverted: the affected `_id` is queued for a
//! refetch of the authoritative version. Commands are dispatched by type.
//!
//! The classifier reads the local oplog (to follow transaction chains) and
//! writes nothing but the `FixUpInfo` it is given.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::context::RollbackContext;
use super::doc_id::DocId;
use super::errors::{RollbackError, RollbackResult};
use super::fixup_info::{FixUpInfo, IndexBuildDetails, RenameCollectionInfo};
use super::interfaces::{OplogInterface, TransactionHistoryIterator};
use crate::document::{encoded_size, first_field, Document};
use crate::observability::Logger;
use crate::oplog::{
    CommandType, NamespaceString, OpType, OplogEntry, Timestamp, TIMESTAMP_FIELD,
    WALL_CLOCK_TIME_FIELD,
};

/// Parsed `o` of a startIndexBuild, commitIndexBuild or abortIndexBuild entry.
#[derive(Debug, Clone, PartialEq)]
struct IndexBuildOplogObject {
    build_uuid: Uuid,
    index_names: Vec<String>,
    index_specs: Vec<Document>,
}

impl IndexBuildOplogObject {
    fn parse(obj: &Document) -> Result<Self, String> {
        let build_uuid = obj
            .get("indexBuildUUID")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'indexBuildUUID'".to_string())
            .and_then(|s| Uuid::parse_str(s).map_err(|e| format!("bad 'indexBuildUUID': {}", e)))?;

        let indexes = obj
            .get("indexes")
            .and_then(Value::as_array)
            .ok_or_else(|| "'indexes' must be an array".to_string())?;

        let mut index_names = Vec::with_capacity(indexes.len());
        let mut index_specs = Vec::with_capacity(indexes.len());
        for index in indexes {
            let spec = index
                .as_object()
                .ok_or_else(|| format!("index spec must be an object, got {}", index))?;
            let name = spec
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("index spec has no name: {}", index))?;
            index_names.push(name.to_string());
            index_specs.push(spec.clone());
        }

        Ok(Self {
            build_uuid,
            index_names,
            index_specs,
        })
    }
}

fn render(document: &Document) -> String {
    Value::Object(document.clone()).to_string()
}

fn require_uuid(entry: &OplogEntry) -> RollbackResult<Uuid> {
    entry.uuid().ok_or_else(|| {
        RollbackError::fatal(format!(
            "Local op on rollback has no collection UUID: {}",
            render(entry.raw())
        ))
    })
}

/// Fill in `ts` and `wall` on an operation nested in applyOps, which does
/// not carry them. The placeholders exist only so the entry parses.
fn with_placeholder_fields(ours: &Document) -> Document {
    let mut fixed = Document::new();
    if !ours.contains_key(TIMESTAMP_FIELD) {
        fixed.insert(TIMESTAMP_FIELD.into(), Timestamp::null().to_value());
    }
    if !ours.contains_key(WALL_CLOCK_TIME_FIELD) {
        fixed.insert(
            WALL_CLOCK_TIME_FIELD.into(),
            Value::String(DateTime::<Utc>::default().to_rfc3339()),
        );
    }
    for (key, value) in ours {
        fixed.insert(key.clone(), value.clone());
    }
    fixed
}

/// Record in `info` what must be undone to roll back one local oplog entry.
///
/// `is_nested` is set for operations found inside an applyOps entry.
/// Malformed entries and commands with no known inverse fail with an
/// unrecoverable error.
pub fn update_fix_up_info_from_local_oplog_entry(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    info: &mut FixUpInfo,
    ours: &Document,
    is_nested: bool,
) -> RollbackResult<()> {
    let size = encoded_size(ours) as u64;
    if size > ctx.config.max_oplog_entry_bytes {
        return Err(RollbackError::fatal(format!(
            "Rollback too large, oplog size: {} bytes",
            size
        )));
    }

    let fixed;
    let raw = if is_nested {
        fixed = with_placeholder_fields(ours);
        &fixed
    } else {
        ours
    };

    let entry = OplogEntry::parse(raw)?;
    if is_nested {
        Logger::trace("ROLLBACK_NESTED_APPLY_OPS_ENTRY", &[("entry", &render(raw))]);
    }

    if entry.op_type() == OpType::Noop {
        return Ok(());
    }

    if entry.nss().is_empty() {
        return Err(RollbackError::fatal(format!(
            "Local op on rollback has no ns: {}",
            render(raw)
        )));
    }

    let obj = entry.operation_to_apply();
    if obj.is_empty() {
        return Err(RollbackError::fatal(format!(
            "Local op on rollback has no object field: {}",
            render(raw)
        )));
    }

    if entry.session_info().txn_number.is_some() {
        let session_id = entry.session_info().session_id.ok_or_else(|| {
            RollbackError::invariant(format!(
                "oplog entry has a txnNumber but no session id: {}",
                render(raw)
            ))
        })?;

        let transaction_table_uuid = info.transaction_table_uuid.ok_or_else(|| {
            RollbackError::fatal(format!(
                "{} does not have a UUID, but local op has a transaction number: {}",
                NamespaceString::session_transactions_table().ns(),
                render(raw)
            ))
        })?;

        info.docs_to_refetch.insert(DocId::new(
            serde_json::json!({ "id": session_id.to_string() }),
            transaction_table_uuid,
            NamespaceString::session_transactions_table().ns(),
        ));
        info.refetch_transaction_docs = true;

        // An uncommitted transaction only needs its table entry restored; a
        // committed one is handled when its commit entry is rolled back.
        if entry.is_partial_transaction() {
            return Ok(());
        }
    }

    if entry.op_type() == OpType::Command {
        return classify_command(ctx, local_oplog, info, &entry);
    }

    let uuid = require_uuid(&entry)?;
    let id = entry.id_element().cloned().ok_or_else(|| {
        let message = format!("Cannot roll back op with no _id. ns: {}", entry.nss());
        Logger::error(
            "ROLLBACK_OP_WITHOUT_ID",
            &[("message", &message), ("entry", &render(raw))],
        );
        RollbackError::fatal(message)
    })?;

    info.docs_to_refetch
        .insert(DocId::new(id, uuid, entry.nss().ns()));
    Ok(())
}

fn classify_command(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    info: &mut FixUpInfo,
    entry: &OplogEntry,
) -> RollbackResult<()> {
    let obj = entry.operation_to_apply();
    let nss = entry.nss();
    // Non-empty, checked by the caller.
    let (command_name, first) = match first_field(obj) {
        Some(field) => field,
        None => return Err(RollbackError::fatal("command entry has an empty object")),
    };

    match entry.command_type() {
        CommandType::Create => {
            info.collections_to_drop.insert(require_uuid(entry)?);
            Ok(())
        }

        CommandType::Drop => {
            let uuid = require_uuid(entry)?;
            let collection_nss = nss.sister_ns(first.as_str().unwrap_or(""));
            info.record_rolling_back_drop(&collection_nss, entry.op_time(), uuid);
            Ok(())
        }

        CommandType::DropIndexes => {
            let uuid = require_uuid(entry)?;
            let index_name = obj.get("index").and_then(Value::as_str).ok_or_else(|| {
                Logger::error(
                    "ROLLBACK_DROP_INDEXES_WITHOUT_NAME",
                    &[("entry", &render(entry.raw()))],
                );
                RollbackError::fatal("Missing index name in dropIndexes operation on rollback.")
            })?;
            let spec = entry.object2().cloned().ok_or_else(|| {
                RollbackError::fatal(format!(
                    "Missing index spec in dropIndexes operation on rollback: {}",
                    render(entry.raw())
                ))
            })?;

            // Re-created in the foreground unless an earlier rolled-back
            // commit or abort moves the build to the restart set.
            info.indexes_to_create
                .entry(uuid)
                .or_default()
                .insert(index_name.to_string(), spec);
            Ok(())
        }

        CommandType::CreateIndexes => {
            let uuid = require_uuid(entry)?;
            let index_name = obj.get("name").and_then(Value::as_str).ok_or_else(|| {
                Logger::error(
                    "ROLLBACK_CREATE_INDEXES_WITHOUT_NAME",
                    &[("entry", &render(entry.raw()))],
                );
                RollbackError::fatal("Missing index name in createIndexes operation on rollback.")
            })?;

            if info.remove_redundant_index_commands(uuid, index_name) {
                return Ok(());
            }
            info.indexes_to_drop
                .entry(uuid)
                .or_default()
                .insert(index_name.to_string());
            Ok(())
        }

        CommandType::StartIndexBuild => {
            let uuid = require_uuid(entry)?;
            let build = parse_index_build(obj, "startIndexBuild")?;

            // A rolled-back commit or abort already queued a restart. The
            // build itself is now rolled back, so its indexes go instead.
            if info.index_builds_to_restart.remove(&build.build_uuid).is_some() {
                Logger::trace(
                    "ROLLBACK_INDEX_BUILD_RESTART_CANCELLED",
                    &[("build_uuid", &build.build_uuid.to_string())],
                );
                info.indexes_to_drop
                    .entry(uuid)
                    .or_default()
                    .extend(build.index_names);
                return Ok(());
            }

            info.unfinished_indexes_to_drop
                .entry(uuid)
                .or_default()
                .extend(build.index_names);
            Ok(())
        }

        CommandType::AbortIndexBuild => {
            let uuid = require_uuid(entry)?;
            let build = parse_index_build(obj, "abortIndexBuild")?;
            queue_index_build_restart(info, uuid, build, "abortIndexBuild")
        }

        CommandType::CommitIndexBuild => {
            let uuid = require_uuid(entry)?;
            let build = parse_index_build(obj, "commitIndexBuild")?;

            // A rolled-back drop of the same index is superseded: the build
            // is restarted rather than committed.
            if let Some(to_create) = info.indexes_to_create.get_mut(&uuid) {
                for name in &build.index_names {
                    to_create.remove(name);
                }
                if to_create.is_empty() {
                    info.indexes_to_create.remove(&uuid);
                }
            }

            queue_index_build_restart(info, uuid, build, "commitIndexBuild")
        }

        CommandType::RenameCollection => {
            let uuid = require_uuid(entry)?;
            let source_ns = first.as_str().unwrap_or("");
            if source_ns.is_empty() {
                let message = format!("Collection name missing from oplog entry: {}", render(obj));
                Logger::info("ROLLBACK_RENAME_WITHOUT_SOURCE", &[("message", &message)]);
                return Err(RollbackError::unrecoverable(message));
            }
            let target_ns = obj.get("to").and_then(Value::as_str).unwrap_or("");
            if target_ns.is_empty() {
                let message = format!("Target namespace missing from oplog entry: {}", render(obj));
                Logger::info("ROLLBACK_RENAME_WITHOUT_TARGET", &[("message", &message)]);
                return Err(RollbackError::unrecoverable(message));
            }

            if let Some(drop_target) = obj.get("dropTarget") {
                info.record_drop_target_info(drop_target, obj, entry.op_time())?;
            }

            let rename_from = match info.collections_to_rename.get(&uuid) {
                // Chained renames collapse into one rename back to the
                // oldest name.
                Some(prior) => prior.rename_from.clone(),
                None => NamespaceString::new(target_ns),
            };
            info.collections_to_rename.insert(
                uuid,
                RenameCollectionInfo {
                    rename_from,
                    rename_to: NamespaceString::new(source_ns),
                },
            );

            // stayTemp may have changed the temp flag.
            info.collections_to_resync_metadata.insert(uuid);
            Ok(())
        }

        // A database is dropped only once it is empty; the collection drops
        // before it are rolled back individually.
        CommandType::DropDatabase => Ok(()),

        CommandType::CollMod => {
            let uuid = require_uuid(entry)?;
            for (modification, _) in obj.iter().skip(1) {
                match modification.as_str() {
                    "validator" | "validationAction" | "validationLevel" => {
                        info.collections_to_resync_metadata.insert(uuid);
                    }
                    _ => {
                        let message = "Cannot roll back a collMod command: ";
                        Logger::error(
                            "ROLLBACK_COLLMOD_UNSUPPORTED",
                            &[("message", message), ("command", &render(obj))],
                        );
                        return Err(RollbackError::fatal(format!("{}{}", message, render(obj))));
                    }
                }
            }
            Ok(())
        }

        CommandType::ApplyOps => classify_apply_ops(ctx, local_oplog, info, entry, first),

        CommandType::AbortTransaction => Ok(()),

        _ => {
            let message = format!("Can't roll back this command yet:  cmdname = {}", command_name);
            Logger::error(
                "ROLLBACK_UNSUPPORTED_COMMAND",
                &[("message", &message), ("command", &render(obj))],
            );
            Err(RollbackError::fatal(message))
        }
    }
}

fn parse_index_build(obj: &Document, command: &str) -> RollbackResult<IndexBuildOplogObject> {
    IndexBuildOplogObject::parse(obj).map_err(|reason| {
        RollbackError::unrecoverable(format!(
            "Error parsing '{}' oplog entry: {}: {}",
            command,
            reason,
            render(obj)
        ))
    })
}

fn queue_index_build_restart(
    info: &mut FixUpInfo,
    coll_uuid: Uuid,
    build: IndexBuildOplogObject,
    command: &str,
) -> RollbackResult<()> {
    if info.index_builds_to_restart.contains_key(&build.build_uuid) {
        return Err(RollbackError::invariant(format!(
            "Tried to restart an index build after rolling back a '{}' oplog entry, but a build \
             with the same UUID is already marked to be restarted: {}",
            command, build.build_uuid
        )));
    }

    Logger::trace(
        "ROLLBACK_INDEX_BUILD_RESTART_QUEUED",
        &[("build_uuid", &build.build_uuid.to_string()), ("command", command)],
    );
    let mut details = IndexBuildDetails::new(coll_uuid);
    details.index_specs = build.index_specs;
    info.index_builds_to_restart.insert(build.build_uuid, details);
    Ok(())
}

/// Classify every operation of an applyOps entry, then of every earlier
/// entry of the same transaction reachable through `prevOpTime`.
fn classify_apply_ops(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    info: &mut FixUpInfo,
    entry: &OplogEntry,
    first: &Value,
) -> RollbackResult<()> {
    let mut history = entry
        .prev_write_op_time_in_transaction()
        .map(|prev| TransactionHistoryIterator::new(local_oplog, prev));
    let mut operations = first.clone();

    loop {
        let ops = operations.as_array().ok_or_else(|| {
            let message = format!(
                "Expected applyOps argument to be an array; found {}",
                operations
            );
            Logger::error("ROLLBACK_APPLY_OPS_MALFORMED", &[("message", &message)]);
            RollbackError::unrecoverable(message)
        })?;

        for sub_op in ops {
            let sub_obj = sub_op.as_object().ok_or_else(|| {
                let message = format!(
                    "Expected applyOps operations to be of Object type, but found {}",
                    sub_op
                );
                Logger::error("ROLLBACK_APPLY_OPS_MALFORMED", &[("message", &message)]);
                RollbackError::unrecoverable(message)
            })?;
            update_fix_up_info_from_local_oplog_entry(ctx, local_oplog, info, sub_obj, true)?;
        }

        let Some(iter) = history.as_mut().filter(|iter| iter.has_next()) else {
            break;
        };
        // Without the full transaction history there is nothing to undo with.
        let next = iter
            .next()
            .map_err(|e| RollbackError::unrecoverable(e.message))?;
        operations = first_field(next.operation_to_apply())
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryOplog, MemoryServices};
    use crate::oplog::OpTime;
    use crate::rollback::config::RollbackConfig;
    use crate::rollback::errors::RollbackErrorKind;
    use serde_json::json;

    const COLL: &str = "3b241101-e2bb-4255-8caf-4136c566a962";

    fn coll_uuid() -> Uuid {
        Uuid::parse_str(COLL).unwrap()
    }

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn command(secs: u32, o: Value) -> Document {
        doc(json!({
            "ts": {"t": secs, "i": 1}, "t": 1, "op": "c", "ns": "test.$cmd",
            "ui": COLL, "o": o, "wall": "2024-01-01T00:00:00Z",
        }))
    }

    fn crud(op: &str, o: Value) -> Document {
        doc(json!({
            "ts": {"t": 5, "i": 1}, "t": 1, "op": op, "ns": "test.c",
            "ui": COLL, "o": o, "wall": "2024-01-01T00:00:00Z",
        }))
    }

    fn classify(info: &mut FixUpInfo, entry: &Document) -> RollbackResult<()> {
        let services = MemoryServices::new();
        let ctx = RollbackContext::new(services.services(), RollbackConfig::default());
        let oplog = MemoryOplog::new("local");
        update_fix_up_info_from_local_oplog_entry(&ctx, &oplog, info, entry, false)
    }

    #[test]
    fn test_insert_queues_refetch() {
        let mut info = FixUpInfo::new();
        classify(&mut info, &crud("i", json!({"_id": 7, "x": 1}))).unwrap();
        let doc_id = info.docs_to_refetch.iter().next().unwrap();
        assert_eq!(doc_id.id, json!(7));
        assert_eq!(doc_id.uuid, coll_uuid());
        assert_eq!(doc_id.ns, "test.c");
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &crud("d", json!({"x": 1}))).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
    }

    #[test]
    fn test_noop_is_ignored() {
        let mut info = FixUpInfo::new();
        classify(&mut info, &crud("n", json!({"msg": "new primary"}))).unwrap();
        assert_eq!(info, FixUpInfo::new());
    }

    #[test]
    fn test_empty_object_is_fatal() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &crud("i", json!({}))).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
    }

    #[test]
    fn test_create_marks_collection_for_drop() {
        let mut info = FixUpInfo::new();
        classify(&mut info, &command(5, json!({"create": "t"}))).unwrap();
        assert!(info.collections_to_drop.contains(&coll_uuid()));
    }

    #[test]
    fn test_drop_records_rename_from_drop_pending() {
        let mut info = FixUpInfo::new();
        classify(&mut info, &command(9, json!({"drop": "c"}))).unwrap();
        let rename = &info.collections_to_rename[&coll_uuid()];
        assert_eq!(rename.rename_to.ns(), "test.c");
        assert_eq!(rename.rename_from.ns(), "test.system.drop.9i1t1.c");
        assert!(info
            .collections_to_remove_from_drop_pending_collections
            .contains_key(&coll_uuid()));
    }

    #[test]
    fn test_rename_without_target_is_unrecoverable() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &command(7, json!({"renameCollection": "test.a"}))).unwrap_err();
        assert!(err.is_unrecoverable());
        assert!(info.collections_to_rename.is_empty());
        assert!(info.collections_to_resync_metadata.is_empty());
    }

    #[test]
    fn test_drop_indexes_requires_index_name() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &command(7, json!({"dropIndexes": "c"}))).unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[test]
    fn test_create_indexes_without_pending_drop_is_dropped() {
        let mut info = FixUpInfo::new();
        classify(
            &mut info,
            &command(7, json!({"createIndexes": "c", "v": 2, "key": {"a": 1}, "name": "a_1"})),
        )
        .unwrap();
        assert!(info.indexes_to_drop[&coll_uuid()].contains("a_1"));
    }

    #[test]
    fn test_start_index_build_after_rolled_back_commit_drops_indexes() {
        let build = Uuid::new_v4().to_string();
        let o = json!({
            "startIndexBuild": "c", "indexBuildUUID": build,
            "indexes": [{"v": 2, "key": {"b": 1}, "name": "b_1"}],
        });
        let mut commit = o.clone();
        commit.as_object_mut().unwrap().remove("startIndexBuild");
        let mut commit_obj = doc(json!({"commitIndexBuild": "c"}));
        commit_obj.extend(commit.as_object().unwrap().clone());

        let mut info = FixUpInfo::new();
        classify(&mut info, &command(9, Value::Object(commit_obj))).unwrap();
        assert_eq!(info.index_builds_to_restart.len(), 1);

        classify(&mut info, &command(8, o)).unwrap();
        assert!(info.index_builds_to_restart.is_empty());
        assert!(info.indexes_to_drop[&coll_uuid()].contains("b_1"));
        assert!(info.unfinished_indexes_to_drop.is_empty());
    }

    #[test]
    fn test_start_index_build_alone_is_unfinished() {
        let mut info = FixUpInfo::new();
        classify(
            &mut info,
            &command(8, json!({
                "startIndexBuild": "c", "indexBuildUUID": Uuid::new_v4().to_string(),
                "indexes": [{"v": 2, "key": {"b": 1}, "name": "b_1"}],
            })),
        )
        .unwrap();
        assert!(info.unfinished_indexes_to_drop[&coll_uuid()].contains("b_1"));
    }

    #[test]
    fn test_duplicate_abort_is_invariant_violation() {
        let o = json!({
            "abortIndexBuild": "c", "indexBuildUUID": Uuid::new_v4().to_string(),
            "indexes": [{"v": 2, "key": {"b": 1}, "name": "b_1"}],
        });
        let mut info = FixUpInfo::new();
        classify(&mut info, &command(8, o.clone())).unwrap();
        let err = classify(&mut info, &command(7, o)).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::InvariantViolation);
    }

    #[test]
    fn test_malformed_index_build_is_unrecoverable() {
        let mut info = FixUpInfo::new();
        let err = classify(
            &mut info,
            &command(8, json!({"abortIndexBuild": "c", "indexBuildUUID": "bad", "indexes": []})),
        )
        .unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Unrecoverable);
    }

    #[test]
    fn test_coll_mod_validator_resyncs_metadata() {
        let mut info = FixUpInfo::new();
        classify(
            &mut info,
            &command(8, json!({"collMod": "c", "validator": {"a": {"$gt": 1}}, "validationLevel": "off"})),
        )
        .unwrap();
        assert!(info.collections_to_resync_metadata.contains(&coll_uuid()));
    }

    #[test]
    fn test_coll_mod_index_is_fatal() {
        let mut info = FixUpInfo::new();
        let err = classify(
            &mut info,
            &command(8, json!({"collMod": "c", "index": {"name": "a_1", "expireAfterSeconds": 600}})),
        )
        .unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &command(8, json!({"convertToCapped": "c", "size": 10})))
            .unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
        assert!(err.message.contains("convertToCapped"));
    }

    #[test]
    fn test_drop_database_and_abort_transaction_are_no_ops() {
        let mut info = FixUpInfo::new();
        classify(&mut info, &command(8, json!({"dropDatabase": 1}))).unwrap();
        classify(&mut info, &command(8, json!({"abortTransaction": 1}))).unwrap();
        assert_eq!(info, FixUpInfo::new());
    }

    #[test]
    fn test_apply_ops_recurses_into_nested_operations() {
        let mut info = FixUpInfo::new();
        classify(
            &mut info,
            &command(8, json!({"applyOps": [
                {"op": "i", "ns": "test.c", "ui": COLL, "o": {"_id": 1}},
                {"op": "u", "ns": "test.c", "ui": COLL, "o": {"$set": {"x": 1}}, "o2": {"_id": 2}},
            ]})),
        )
        .unwrap();
        let ids: Vec<Value> = info.docs_to_refetch.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_apply_ops_requires_array() {
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &command(8, json!({"applyOps": {"op": "i"}}))).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Unrecoverable);
    }

    #[test]
    fn test_transaction_number_without_table_is_fatal() {
        let mut entry = crud("i", json!({"_id": 1}));
        entry.insert("lsid".into(), json!({"id": Uuid::new_v4().to_string()}));
        entry.insert("txnNumber".into(), json!(3));
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &entry).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
    }

    #[test]
    fn test_partial_transaction_refetches_only_session_row() {
        let session = Uuid::new_v4();
        let table = Uuid::new_v4();
        let mut entry = command(8, json!({"applyOps": [
            {"op": "i", "ns": "test.c", "ui": COLL, "o": {"_id": 1}},
        ], "partialTxn": true}));
        entry.insert("lsid".into(), json!({"id": session.to_string()}));
        entry.insert("txnNumber".into(), json!(3));

        let mut info = FixUpInfo::new();
        info.transaction_table_uuid = Some(table);
        classify(&mut info, &entry).unwrap();

        assert!(info.refetch_transaction_docs);
        assert_eq!(info.docs_to_refetch.len(), 1);
        let doc_id = info.docs_to_refetch.iter().next().unwrap();
        assert_eq!(doc_id.uuid, table);
        assert_eq!(doc_id.id, json!({"id": session.to_string()}));
        assert_eq!(doc_id.ns, "config.transactions");
    }

    #[test]
    fn test_committed_transaction_walks_history_chain() {
        let session = Uuid::new_v4().to_string();
        let table = Uuid::new_v4();
        let oplog = MemoryOplog::new("local");

        let mut first = command(6, json!({"applyOps": [
            {"op": "i", "ns": "test.c", "ui": COLL, "o": {"_id": "first"}},
        ], "partialTxn": true}));
        first.insert("lsid".into(), json!({"id": session}));
        first.insert("txnNumber".into(), json!(1));
        first.insert("prevOpTime".into(), OpTime::null().to_value());
        oplog.push(first);

        let mut commit = command(7, json!({"applyOps": [
            {"op": "i", "ns": "test.c", "ui": COLL, "o": {"_id": "second"}},
        ]}));
        commit.insert("lsid".into(), json!({"id": session}));
        commit.insert("txnNumber".into(), json!(1));
        commit.insert("prevOpTime".into(), json!({"ts": {"t": 6, "i": 1}, "t": 1}));
        oplog.push(commit.clone());

        let services = MemoryServices::new();
        let ctx = RollbackContext::new(services.services(), RollbackConfig::default());
        let mut info = FixUpInfo::new();
        info.transaction_table_uuid = Some(table);
        update_fix_up_info_from_local_oplog_entry(&ctx, &oplog, &mut info, &commit, false)
            .unwrap();

        let ids: Vec<Value> = info
            .docs_to_refetch
            .iter()
            .filter(|d| d.uuid == coll_uuid())
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&json!("first")));
        assert!(ids.contains(&json!("second")));
    }

    #[test]
    fn test_broken_transaction_chain_is_unrecoverable() {
        let mut entry = command(7, json!({"applyOps": [
            {"op": "i", "ns": "test.c", "ui": COLL, "o": {"_id": 1}},
        ]}));
        entry.insert("prevOpTime".into(), json!({"ts": {"t": 6, "i": 1}, "t": 1}));
        let mut info = FixUpInfo::new();
        let err = classify(&mut info, &entry).unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Unrecoverable);
    }

    #[test]
    fn test_oversized_entry_is_fatal() {
        let services = MemoryServices::new();
        let config = RollbackConfig {
            max_oplog_entry_bytes: 64,
            ..RollbackConfig::default()
        };
        let ctx = RollbackContext::new(services.services(), config);
        let oplog = MemoryOplog::new("local");
        let mut info = FixUpInfo::new();
        let entry = crud("i", json!({"_id": 1, "pad": "x".repeat(128)}));
        let err = update_fix_up_info_from_local_oplog_entry(&ctx, &oplog, &mut info, &entry, false)
            .unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::Fatal);
    }
}
