//! The aggregate of everything a rollback must undo
//!
//! Built by the classifier while the common point search walks the local
//! oplog backwards, finalized by `remove_redundant_operations`, and consumed
//! once by the fix-up executor. Pure data, no I/O.
//!
//! Ordered collections are used throughout so that fix-up visits
//! collections and documents in a deterministic order.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use uuid::Uuid;

use super::doc_id::DocId;
use super::errors::{RollbackError, RollbackResult};
use crate::document::Document;
use crate::observability::Logger;
use crate::oplog::{NamespaceString, OpTime, RecordId};

/// A corrective rename: move the collection at `rename_from` back to
/// `rename_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameCollectionInfo {
    pub rename_from: NamespaceString,
    pub rename_to: NamespaceString,
}

/// A two-phase index build to restart after rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBuildDetails {
    /// Collection the build runs on
    pub coll_uuid: Uuid,
    /// Spec of every index in the build
    pub index_specs: Vec<Document>,
}

impl IndexBuildDetails {
    pub fn new(coll_uuid: Uuid) -> Self {
        Self {
            coll_uuid,
            index_specs: Vec::new(),
        }
    }
}

/// Index builds keyed by build UUID.
pub type IndexBuilds = BTreeMap<Uuid, IndexBuildDetails>;

/// Everything needed to undo the local operations after the common point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixUpInfo {
    /// Newest operation present in both oplogs
    pub common_point: OpTime,
    /// Local record id of the common point entry
    pub common_point_our_disk_loc: RecordId,

    /// Documents whose authoritative version must be refetched
    pub docs_to_refetch: BTreeSet<DocId>,

    /// Indexes to re-create because their drop is rolled back
    pub indexes_to_create: BTreeMap<Uuid, BTreeMap<String, Document>>,
    /// Indexes to drop because their creation is rolled back
    pub indexes_to_drop: BTreeMap<Uuid, BTreeSet<String>>,
    /// In-progress indexes to drop because their build start is rolled back
    pub unfinished_indexes_to_drop: BTreeMap<Uuid, BTreeSet<String>>,
    /// Two-phase builds whose commit or abort is rolled back
    pub index_builds_to_restart: IndexBuilds,

    /// Collections whose creation is rolled back
    pub collections_to_drop: BTreeSet<Uuid>,
    /// Corrective renames, one per collection
    pub collections_to_rename: BTreeMap<Uuid, RenameCollectionInfo>,
    /// Collections whose options must be copied from the sync source
    pub collections_to_resync_metadata: BTreeSet<Uuid>,
    /// Rolled-back two-phase drops
    pub collections_to_remove_from_drop_pending_collections:
        BTreeMap<Uuid, (OpTime, NamespaceString)>,

    /// UUID of the session transactions table, if it exists
    pub transaction_table_uuid: Option<Uuid>,
    /// Whether any transactions table document is being refetched
    pub refetch_transaction_docs: bool,

    /// Sync source rollback id observed when rollback started
    pub rbid: i32,
    /// Local last applied OpTime observed when rollback started
    pub local_top_of_oplog: OpTime,
}

impl FixUpInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every pending refetch for a collection.
    pub fn remove_all_docs_to_refetch_for(&mut self, collection_uuid: Uuid) {
        self.docs_to_refetch.retain(|doc| doc.uuid != collection_uuid);
    }

    /// Purge all work scheduled on collections that will be dropped anyway.
    pub fn remove_redundant_operations(&mut self) {
        let to_drop: Vec<Uuid> = self.collections_to_drop.iter().copied().collect();
        for uuid in to_drop {
            self.remove_all_docs_to_refetch_for(uuid);
            self.indexes_to_drop.remove(&uuid);
            self.indexes_to_create.remove(&uuid);
            self.collections_to_rename.remove(&uuid);
            self.collections_to_resync_metadata.remove(&uuid);
        }
    }

    /// Cancel a pending re-create of `index_name` on `uuid`.
    ///
    /// Returns true if a re-create was pending and has been removed. Only a
    /// rolled-back create can cancel a rolled-back drop seen earlier in the
    /// scan; the opposite order may involve two different specs under the
    /// same name.
    pub fn remove_redundant_index_commands(&mut self, uuid: Uuid, index_name: &str) -> bool {
        let uuid_str = uuid.to_string();
        let Some(indexes) = self.indexes_to_create.get_mut(&uuid) else {
            Logger::trace(
                "ROLLBACK_NO_INDEXES_TO_CREATE",
                &[("uuid", &uuid_str), ("index", index_name)],
            );
            return false;
        };

        if indexes.remove(index_name).is_none() {
            return false;
        }

        Logger::trace(
            "ROLLBACK_REDUNDANT_INDEX_CREATE_REMOVED",
            &[("uuid", &uuid_str), ("index", index_name)],
        );
        if indexes.is_empty() {
            self.indexes_to_create.remove(&uuid);
        }
        true
    }

    /// Record the undo of a two-phase drop of `nss` at `op_time`.
    ///
    /// The dropped collection sits under its drop-pending name until reaped,
    /// so undoing the drop is a rename back plus removal from the reaper.
    pub fn record_rolling_back_drop(&mut self, nss: &NamespaceString, op_time: OpTime, uuid: Uuid) {
        self.collections_to_remove_from_drop_pending_collections
            .insert(uuid, (op_time, nss.clone()));

        // A collection cannot be renamed after it was dropped, so this is the
        // first rename recorded for it.
        self.collections_to_rename.insert(
            uuid,
            RenameCollectionInfo {
                rename_from: nss.make_drop_pending_namespace(op_time),
                rename_to: nss.clone(),
            },
        );
    }

    /// Record the undo of the target drop performed by a rename.
    pub fn record_drop_target_info(
        &mut self,
        drop_target: &Value,
        obj: &Document,
        op_time: OpTime,
    ) -> RollbackResult<()> {
        let drop_target_uuid = drop_target
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                RollbackError::unrecoverable(format!(
                    "Unable to roll back renameCollection. Cannot parse dropTarget UUID {} in oplog entry {}",
                    drop_target,
                    Value::Object(obj.clone())
                ))
            })?;

        let dropped_ns = match obj.get("to").and_then(Value::as_str) {
            Some(to) if !to.is_empty() => NamespaceString::new(to),
            _ => {
                return Err(RollbackError::unrecoverable(format!(
                    "Unable to roll back renameCollection. Target namespace missing from oplog entry {}",
                    Value::Object(obj.clone())
                )))
            }
        };
        self.record_rolling_back_drop(&dropped_ns, op_time, drop_target_uuid);
        Ok(())
    }
}
