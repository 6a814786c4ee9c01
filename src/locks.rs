//! Per-operation lock state
//!
//! Tracks which database and collection resources the current operation
//! holds and in which mode. Conflict resolution between operations belongs
//! to the storage layer; this locker exists so that the rollback core can
//! assert its locking discipline:
//!
//! - no locks held on entry to fix-up
//! - database exclusive for collection drop, rename, and metadata resync
//! - collection exclusive (under database intent) for index changes
//! - oplog collection exclusive only for truncation
//!
//! Guards release their resource on drop.

use std::fmt;
use std::sync::Mutex;

use crate::oplog::NamespaceString;

/// Lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Intent shared
    IntentShared,
    /// Intent exclusive
    IntentExclusive,
    /// Shared
    Shared,
    /// Exclusive
    Exclusive,
}

impl LockMode {
    /// Short mode name as used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::IntentShared => "IS",
            LockMode::IntentExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
        }
    }

    /// Check if holding `self` satisfies a request for `required`.
    pub fn covers(&self, required: LockMode) -> bool {
        match (self, required) {
            (LockMode::Exclusive, _) => true,
            (LockMode::Shared, LockMode::Shared | LockMode::IntentShared) => true,
            (LockMode::IntentExclusive, LockMode::IntentExclusive | LockMode::IntentShared) => true,
            (LockMode::IntentShared, LockMode::IntentShared) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lockable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    /// A whole database
    Database(String),
    /// A single collection, by namespace
    Collection(String),
}

#[derive(Debug)]
struct HeldLock {
    id: u64,
    resource: ResourceId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockerState {
    next_id: u64,
    held: Vec<HeldLock>,
}

/// Lock state of one operation.
#[derive(Debug, Default)]
pub struct Locker {
    state: Mutex<LockerState>,
}

impl Locker {
    /// Create a locker holding nothing.
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, resource: ResourceId, mode: LockMode) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let id = state.next_id;
        state.held.push(HeldLock { id, resource, mode });
        id
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.held.retain(|lock| lock.id != id);
    }

    /// Lock a database.
    pub fn lock_db(&self, db: &str, mode: LockMode) -> LockGuard<'_> {
        let id = self.acquire(ResourceId::Database(db.to_string()), mode);
        LockGuard {
            locker: self,
            ids: vec![id],
        }
    }

    /// Lock a collection, taking the matching intent lock on its database.
    pub fn lock_collection(
        &self,
        nss: &NamespaceString,
        db_mode: LockMode,
        coll_mode: LockMode,
    ) -> LockGuard<'_> {
        let db_id = self.acquire(ResourceId::Database(nss.db().to_string()), db_mode);
        let coll_id = self.acquire(ResourceId::Collection(nss.ns()), coll_mode);
        LockGuard {
            locker: self,
            ids: vec![coll_id, db_id],
        }
    }

    /// Check if any lock is held.
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !state.held.is_empty()
    }

    /// Check if `db` is held in a mode covering `mode`.
    pub fn is_db_locked_for_mode(&self, db: &str, mode: LockMode) -> bool {
        self.is_resource_locked_for_mode(&ResourceId::Database(db.to_string()), mode)
    }

    /// Check if the collection is held in a mode covering `mode`.
    pub fn is_collection_locked_for_mode(&self, nss: &NamespaceString, mode: LockMode) -> bool {
        self.is_resource_locked_for_mode(&ResourceId::Collection(nss.ns()), mode)
    }

    fn is_resource_locked_for_mode(&self, resource: &ResourceId, mode: LockMode) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .held
            .iter()
            .any(|lock| &lock.resource == resource && lock.mode.covers(mode))
    }
}

/// RAII guard over one or more held resources.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locker: &'a Locker,
    ids: Vec<u64>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.locker.release(id);
        }
    }
}
