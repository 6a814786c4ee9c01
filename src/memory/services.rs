//! In-memory local services
//!
//! Besides doing what the traits ask, each service records what it was
//! asked to do so tests can assert on it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::catalog::MemoryCatalog;
use crate::oplog::{NamespaceString, OpTime, Timestamp};
use crate::rollback::context::RollbackServices;
use crate::rollback::errors::{RollbackError, RollbackResult};
use crate::rollback::fixup_info::IndexBuilds;
use crate::rollback::interfaces::{
    AuthorizationManager, DropPendingCollectionReaper, IndexBuildsCoordinator, KeyManagerCache,
    SessionCatalog, ShardIdentityRollbackNotifier, ShardRegistry, StorageEngine,
};

#[derive(Debug, Default)]
struct EngineState {
    stable_timestamp: Option<Timestamp>,
    initial_data_timestamp: Option<Timestamp>,
    unstable_checkpoints: usize,
    durable_waits: usize,
}

/// Storage engine without recover-to-stable-timestamp support.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    state: RwLock<EngineState>,
}

impl MemoryStorageEngine {
    pub fn stable_timestamp(&self) -> Option<Timestamp> {
        self.state.read().ok().and_then(|s| s.stable_timestamp)
    }

    pub fn initial_data_timestamp(&self) -> Option<Timestamp> {
        self.state.read().ok().and_then(|s| s.initial_data_timestamp)
    }

    pub fn unstable_checkpoints(&self) -> usize {
        self.state.read().map(|s| s.unstable_checkpoints).unwrap_or_default()
    }

    pub fn durable_waits(&self) -> usize {
        self.state.read().map(|s| s.durable_waits).unwrap_or_default()
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn supports_recover_to_stable_timestamp(&self) -> bool {
        false
    }

    fn set_initial_data_timestamp(&self, ts: Timestamp) {
        if let Ok(mut state) = self.state.write() {
            state.initial_data_timestamp = Some(ts);
        }
    }

    fn set_stable_timestamp(&self, ts: Timestamp, _force: bool) {
        if let Ok(mut state) = self.state.write() {
            state.stable_timestamp = Some(ts);
        }
    }

    fn wait_until_unjournaled_writes_durable(&self, stable_checkpoint: bool) {
        if let Ok(mut state) = self.state.write() {
            if !stable_checkpoint {
                state.unstable_checkpoints += 1;
            }
        }
    }

    fn wait_until_durable(&self) {
        if let Ok(mut state) = self.state.write() {
            state.durable_waits += 1;
        }
    }
}

/// Registry of collections awaiting reaping, keyed by drop OpTime.
#[derive(Debug, Default)]
pub struct MemoryDropPendingReaper {
    pending: RwLock<BTreeMap<OpTime, NamespaceString>>,
}

impl MemoryDropPendingReaper {
    pub fn add_drop_pending_namespace(&self, op_time: OpTime, nss: NamespaceString) {
        if let Ok(mut pending) = self.pending.write() {
            pending.insert(op_time, nss);
        }
    }

    pub fn pending(&self) -> BTreeMap<OpTime, NamespaceString> {
        self.pending.read().map(|p| p.clone()).unwrap_or_default()
    }
}

impl DropPendingCollectionReaper for MemoryDropPendingReaper {
    fn roll_back_drop_pending_collection(&self, op_time: OpTime, nss: &NamespaceString) -> bool {
        let Ok(mut pending) = self.pending.write() else {
            return false;
        };
        // Registered under the drop-pending name of the original namespace.
        let drop_pending = nss.make_drop_pending_namespace(op_time);
        match pending.get(&op_time) {
            Some(registered) if registered == nss || registered == &drop_pending => {
                pending.remove(&op_time);
                true
            }
            _ => false,
        }
    }
}

/// Records the builds it is asked to restart.
#[derive(Debug, Default)]
pub struct MemoryIndexBuildsCoordinator {
    restarted: RwLock<IndexBuilds>,
}

impl MemoryIndexBuildsCoordinator {
    pub fn restarted(&self) -> IndexBuilds {
        self.restarted.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl IndexBuildsCoordinator for MemoryIndexBuildsCoordinator {
    fn restart_index_builds_for_recovery(&self, builds: &IndexBuilds) {
        if let Ok(mut restarted) = self.restarted.write() {
            restarted.extend(builds.iter().map(|(uuid, details)| (*uuid, details.clone())));
        }
    }
}

/// Counts every cache reset and invalidation.
#[derive(Debug, Default)]
pub struct MemoryInvalidations {
    auth_reloads: AtomicUsize,
    fail_auth_reload: AtomicBool,
    session_invalidations: AtomicUsize,
    key_cache_resets: AtomicUsize,
    shard_registry_clears: AtomicUsize,
    shard_identity_rolled_back: AtomicBool,
}

impl MemoryInvalidations {
    pub fn auth_reloads(&self) -> usize {
        self.auth_reloads.load(Ordering::SeqCst)
    }

    pub fn set_fail_auth_reload(&self, fail: bool) {
        self.fail_auth_reload.store(fail, Ordering::SeqCst);
    }

    pub fn session_invalidations(&self) -> usize {
        self.session_invalidations.load(Ordering::SeqCst)
    }

    pub fn key_cache_resets(&self) -> usize {
        self.key_cache_resets.load(Ordering::SeqCst)
    }

    pub fn shard_registry_clears(&self) -> usize {
        self.shard_registry_clears.load(Ordering::SeqCst)
    }

    /// Report that the shard identity document was rolled back.
    pub fn set_shard_identity_rolled_back(&self, rolled_back: bool) {
        self.shard_identity_rolled_back.store(rolled_back, Ordering::SeqCst);
    }
}

impl AuthorizationManager for MemoryInvalidations {
    fn initialize(&self) -> RollbackResult<()> {
        if self.fail_auth_reload.load(Ordering::SeqCst) {
            return Err(RollbackError::storage("cannot read admin.system.users"));
        }
        self.auth_reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SessionCatalog for MemoryInvalidations {
    fn invalidate_all_sessions(&self) {
        self.session_invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

impl KeyManagerCache for MemoryInvalidations {
    fn reset_key_manager_cache(&self) {
        self.key_cache_resets.fetch_add(1, Ordering::SeqCst);
    }
}

impl ShardRegistry for MemoryInvalidations {
    fn clear_entries(&self) {
        self.shard_registry_clears.fetch_add(1, Ordering::SeqCst);
    }
}

impl ShardIdentityRollbackNotifier for MemoryInvalidations {
    fn did_rollback_happen(&self) -> bool {
        self.shard_identity_rolled_back.load(Ordering::SeqCst)
    }
}

/// Every local service of one in-memory node.
#[derive(Debug)]
pub struct MemoryServices {
    pub catalog: Arc<MemoryCatalog>,
    pub storage_engine: MemoryStorageEngine,
    pub drop_pending_reaper: MemoryDropPendingReaper,
    pub index_builds: MemoryIndexBuildsCoordinator,
    pub invalidations: MemoryInvalidations,
}

impl Default for MemoryServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServices {
    /// Services over a catalog holding only an empty local oplog.
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(MemoryCatalog::new()))
    }

    pub fn with_catalog(catalog: Arc<MemoryCatalog>) -> Self {
        Self {
            catalog,
            storage_engine: MemoryStorageEngine::default(),
            drop_pending_reaper: MemoryDropPendingReaper::default(),
            index_builds: MemoryIndexBuildsCoordinator::default(),
            invalidations: MemoryInvalidations::default(),
        }
    }

    /// Borrow as the services a rollback runs against.
    pub fn services(&self) -> RollbackServices<'_> {
        RollbackServices {
            catalog: self.catalog.as_ref(),
            storage_engine: &self.storage_engine,
            drop_pending_reaper: &self.drop_pending_reaper,
            index_builds: &self.index_builds,
            auth: &self.invalidations,
            sessions: &self.invalidations,
            key_manager: Some(&self.invalidations),
            shard_registry: Some(&self.invalidations),
            shard_identity: &self.invalidations,
        }
    }
}
