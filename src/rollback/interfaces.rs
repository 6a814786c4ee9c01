//! Collaborators the rollback core consumes
//!
//! The core never owns storage, networking or replication state. Each
//! concern is reached through one of these traits:
//!
//! - `OplogInterface` / `OplogIterator`: newest-first oplog reads, local
//!   or remote
//! - `RollbackSource`: the sync source
//! - `ReplicationCoordinator`, `ReplicationProcess`, `ConsistencyMarkers`:
//!   member state and durable replication markers
//! - `Catalog`, `StorageEngine`: local collections, indexes, documents and
//!   checkpoint timestamps
//! - the remaining traits: caches and registries invalidated at the end
//!   of fix-up
//!
//! All methods take `&self`; implementations use interior mutability.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use super::errors::{RollbackError, RollbackResult};
use super::fixup_info::IndexBuilds;
use super::options::{ValidationAction, ValidationLevel};
use crate::document::Document;
use crate::oplog::{NamespaceString, OpTime, OplogEntry, RecordId, Timestamp};

/// Cursor over oplog entries, newest first.
pub trait OplogIterator {
    /// Next older entry with its record id, or `None` when exhausted.
    fn next(&mut self) -> RollbackResult<Option<(Document, RecordId)>>;
}

/// Read access to an oplog.
pub trait OplogInterface {
    /// Human-readable description used in log lines.
    fn describe(&self) -> String;

    /// Iterate from the newest entry backwards.
    fn make_iterator(&self) -> RollbackResult<Box<dyn OplogIterator + '_>>;

    /// Look up the entry written at `op_time`.
    fn find_by_op_time(&self, op_time: OpTime) -> RollbackResult<Option<Document>>;
}

/// Walks the entries of one multi-entry transaction through their
/// `prevOpTime` links, newest first.
pub struct TransactionHistoryIterator<'a> {
    oplog: &'a dyn OplogInterface,
    next_op_time: OpTime,
}

impl<'a> TransactionHistoryIterator<'a> {
    /// Start at the entry written at `start`.
    pub fn new(oplog: &'a dyn OplogInterface, start: OpTime) -> Self {
        Self {
            oplog,
            next_op_time: start,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.next_op_time.is_null() && !self.next_op_time.ts.is_null()
    }

    /// Fetch the next entry of the chain.
    pub fn next(&mut self) -> RollbackResult<OplogEntry> {
        let op_time = self.next_op_time;
        let raw = self.oplog.find_by_op_time(op_time)?.ok_or_else(|| {
            RollbackError::storage(format!(
                "transaction history entry {} missing from {}",
                op_time,
                self.oplog.describe()
            ))
        })?;
        let entry = OplogEntry::parse(&raw)?;
        self.next_op_time = entry
            .prev_write_op_time_in_transaction()
            .unwrap_or_else(OpTime::null);
        Ok(entry)
    }
}

/// The sync source rollback reconciles against.
pub trait RollbackSource {
    /// Host description of the sync source.
    fn source(&self) -> String;

    /// Current rollback id of the sync source.
    fn rollback_id(&self) -> RollbackResult<i32>;

    /// Newest entry of the sync source's oplog; empty if it has none.
    fn last_operation(&self) -> RollbackResult<Document>;

    /// The sync source's oplog.
    fn oplog(&self) -> &dyn OplogInterface;

    /// Fetch one document by collection UUID.
    ///
    /// Returns the document (empty when no document matches) and the
    /// namespace the UUID resolves to on the source.
    fn find_one_by_uuid(
        &self,
        db: &str,
        uuid: Uuid,
        filter: &Document,
    ) -> RollbackResult<(Document, NamespaceString)>;

    /// Collection info (`{name, options, info}`) by collection UUID.
    fn collection_info_by_uuid(&self, db: &str, uuid: Uuid) -> RollbackResult<Document>;
}

/// Replica set member states that rollback moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Startup2,
    Primary,
    Secondary,
    Recovering,
    Rollback,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberState::Startup2 => "STARTUP2",
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Recovering => "RECOVERING",
            MemberState::Rollback => "ROLLBACK",
        };
        write!(f, "{}", name)
    }
}

/// Whether data is known to be consistent at the last applied OpTime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataConsistency {
    Consistent,
    Inconsistent,
}

/// Replication coordinator of this node.
pub trait ReplicationCoordinator {
    fn my_last_applied_op_time(&self) -> OpTime;
    fn last_committed_op_time(&self) -> OpTime;
    fn current_committed_snapshot_op_time(&self) -> OpTime;
    fn member_state(&self) -> MemberState;

    /// Transition to `state`, refusing if the current state does not allow
    /// it (for example after winning an election).
    fn set_follower_mode_strict(&self, state: MemberState) -> RollbackResult<()>;

    /// Transition to `state`.
    fn set_follower_mode(&self, state: MemberState) -> RollbackResult<()>;

    /// Reload last applied and last durable OpTimes from the local oplog.
    fn reset_last_op_times_from_oplog(&self, consistency: DataConsistency);
}

/// Durable markers describing how far this node's data can be trusted.
pub trait ConsistencyMarkers {
    fn min_valid(&self) -> OpTime;
    fn set_min_valid(&self, min_valid: OpTime);
    fn applied_through(&self) -> OpTime;
    /// Set appliedThrough; `set_timestamp` false means an untimestamped write.
    fn set_applied_through(&self, op_time: OpTime, set_timestamp: bool);
    fn clear_applied_through(&self, write_timestamp: Timestamp);
}

/// Replication process state of this node.
pub trait ReplicationProcess {
    fn consistency_markers(&self) -> &dyn ConsistencyMarkers;
    /// Local rollback id.
    fn rollback_id(&self) -> i32;
    fn increment_rollback_id(&self) -> RollbackResult<()>;
}

/// Build state of an index found in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Ready,
    Unfinished,
}

/// Local collection catalog and document access.
pub trait Catalog {
    fn lookup_nss_by_uuid(&self, uuid: Uuid) -> Option<NamespaceString>;
    fn lookup_uuid_by_nss(&self, nss: &NamespaceString) -> Option<Uuid>;
    fn database_exists(&self, db: &str) -> bool;
    fn is_capped(&self, uuid: Uuid) -> RollbackResult<bool>;

    /// Find an index by name, including unfinished builds.
    fn find_index(&self, uuid: Uuid, name: &str) -> Option<IndexState>;
    fn drop_index(&self, uuid: Uuid, name: &str) -> RollbackResult<()>;
    fn drop_unfinished_index(&self, uuid: Uuid, name: &str) -> RollbackResult<()>;
    fn create_index(&self, uuid: Uuid, spec: &Document) -> RollbackResult<()>;

    /// Drop immediately, skipping the two-phase drop protocol.
    fn drop_collection_even_if_system(&self, nss: &NamespaceString) -> RollbackResult<()>;

    /// Rename the collection `uuid` to `target`. Fails with
    /// `NamespaceExists` if another collection holds `target`.
    fn rename_collection_for_rollback(
        &self,
        target: &NamespaceString,
        uuid: Uuid,
    ) -> RollbackResult<()>;

    fn set_is_temp(&self, uuid: Uuid, temp: bool) -> RollbackResult<()>;
    fn update_validator(
        &self,
        uuid: Uuid,
        validator: &Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> RollbackResult<()>;

    fn find_by_id(&self, uuid: Uuid, id: &Value) -> RollbackResult<Option<(RecordId, Document)>>;
    fn delete_by_id(&self, uuid: Uuid, id: &Value) -> RollbackResult<()>;
    /// Replace the document with `id`, inserting it if absent.
    fn upsert_by_id(&self, uuid: Uuid, id: &Value, document: &Document) -> RollbackResult<()>;
    fn scan_collection(&self, uuid: Uuid) -> RollbackResult<Vec<Document>>;

    /// Remove every record after `loc` in a capped collection, and `loc`
    /// itself when `inclusive`.
    fn capped_truncate_after(&self, uuid: Uuid, loc: RecordId, inclusive: bool)
        -> RollbackResult<()>;
    fn truncate(&self, uuid: Uuid) -> RollbackResult<()>;
}

/// Checkpoint and timestamp control of the storage engine.
pub trait StorageEngine {
    fn supports_recover_to_stable_timestamp(&self) -> bool;
    fn set_initial_data_timestamp(&self, ts: Timestamp);
    fn set_stable_timestamp(&self, ts: Timestamp, force: bool);
    /// Block until writes are in a checkpoint (`stable_checkpoint` false
    /// forces an unstable one).
    fn wait_until_unjournaled_writes_durable(&self, stable_checkpoint: bool);
    fn wait_until_durable(&self);
}

/// Reaper of collections in the drop-pending state.
pub trait DropPendingCollectionReaper {
    /// Forget the pending drop of `nss` at `op_time`. Returns true if it
    /// was registered.
    fn roll_back_drop_pending_collection(&self, op_time: OpTime, nss: &NamespaceString) -> bool;
}

pub trait IndexBuildsCoordinator {
    /// Resume builds as two-phase builds awaiting a replicated decision.
    fn restart_index_builds_for_recovery(&self, builds: &IndexBuilds);
}

pub trait AuthorizationManager {
    /// Reload cached user and role data.
    fn initialize(&self) -> RollbackResult<()>;
}

pub trait SessionCatalog {
    fn invalidate_all_sessions(&self);
}

pub trait KeyManagerCache {
    fn reset_key_manager_cache(&self);
}

pub trait ShardRegistry {
    fn clear_entries(&self);
}

pub trait ShardIdentityRollbackNotifier {
    /// Whether the rolled-back history touched the shard identity document.
    fn did_rollback_happen(&self) -> bool;
}
