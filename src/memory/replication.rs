//! In-memory replication coordinator and process

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use super::catalog::MemoryCatalog;
use crate::oplog::{OpTime, Timestamp};
use crate::rollback::errors::{RollbackError, RollbackResult};
use crate::rollback::interfaces::{
    ConsistencyMarkers, DataConsistency, MemberState, ReplicationCoordinator, ReplicationProcess,
};

#[derive(Debug)]
struct CoordinatorState {
    member_state: MemberState,
    last_applied: OpTime,
    last_durable: OpTime,
    last_committed: OpTime,
    committed_snapshot: OpTime,
    consistency: Option<DataConsistency>,
}

/// Replication coordinator of one in-memory node.
///
/// Last applied and durable OpTimes are reloaded from the node's catalog.
#[derive(Debug)]
pub struct MemoryReplicationCoordinator {
    catalog: Arc<MemoryCatalog>,
    state: RwLock<CoordinatorState>,
    refuse_rollback: AtomicBool,
    transitions: RwLock<Vec<MemberState>>,
}

impl MemoryReplicationCoordinator {
    /// A SECONDARY whose last applied OpTime is the top of its oplog.
    pub fn new(catalog: Arc<MemoryCatalog>) -> Self {
        let top = catalog.top_of_oplog().unwrap_or_else(OpTime::null);
        Self {
            catalog,
            state: RwLock::new(CoordinatorState {
                member_state: MemberState::Secondary,
                last_applied: top,
                last_durable: top,
                last_committed: OpTime::null(),
                committed_snapshot: OpTime::null(),
                consistency: None,
            }),
            refuse_rollback: AtomicBool::new(false),
            transitions: RwLock::new(Vec::new()),
        }
    }

    pub fn set_member_state(&self, member_state: MemberState) {
        if let Ok(mut state) = self.state.write() {
            state.member_state = member_state;
        }
    }

    /// Set both the last committed and committed snapshot OpTimes.
    pub fn set_last_committed(&self, op_time: OpTime) {
        if let Ok(mut state) = self.state.write() {
            state.last_committed = op_time;
            state.committed_snapshot = op_time;
        }
    }

    /// Refuse the transition to ROLLBACK, as after winning an election.
    pub fn set_refuse_rollback(&self, refuse: bool) {
        self.refuse_rollback.store(refuse, Ordering::SeqCst);
    }

    pub fn last_durable_op_time(&self) -> OpTime {
        self.state
            .read()
            .map(|s| s.last_durable)
            .unwrap_or_else(|_| OpTime::null())
    }

    /// Consistency passed to the last oplog reload, if any.
    pub fn last_reset_consistency(&self) -> Option<DataConsistency> {
        self.state.read().ok().and_then(|s| s.consistency)
    }

    /// Every state entered, in order.
    pub fn transitions(&self) -> Vec<MemberState> {
        self.transitions
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn enter(&self, member_state: MemberState) -> RollbackResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| RollbackError::storage("Lock poisoned"))?;
        state.member_state = member_state;
        if let Ok(mut transitions) = self.transitions.write() {
            transitions.push(member_state);
        }
        Ok(())
    }
}

impl ReplicationCoordinator for MemoryReplicationCoordinator {
    fn my_last_applied_op_time(&self) -> OpTime {
        self.state
            .read()
            .map(|s| s.last_applied)
            .unwrap_or_else(|_| OpTime::null())
    }

    fn last_committed_op_time(&self) -> OpTime {
        self.state
            .read()
            .map(|s| s.last_committed)
            .unwrap_or_else(|_| OpTime::null())
    }

    fn current_committed_snapshot_op_time(&self) -> OpTime {
        self.state
            .read()
            .map(|s| s.committed_snapshot)
            .unwrap_or_else(|_| OpTime::null())
    }

    fn member_state(&self) -> MemberState {
        self.state
            .read()
            .map(|s| s.member_state)
            .unwrap_or(MemberState::Startup2)
    }

    fn set_follower_mode_strict(&self, member_state: MemberState) -> RollbackResult<()> {
        let current = self.member_state();
        if self.refuse_rollback.load(Ordering::SeqCst) || current == MemberState::Primary {
            return Err(RollbackError::illegal_state_transition(format!(
                "cannot transition from {} to {}",
                current, member_state
            )));
        }
        self.enter(member_state)
    }

    fn set_follower_mode(&self, member_state: MemberState) -> RollbackResult<()> {
        self.enter(member_state)
    }

    fn reset_last_op_times_from_oplog(&self, consistency: DataConsistency) {
        let top = self.catalog.top_of_oplog().unwrap_or_else(OpTime::null);
        if let Ok(mut state) = self.state.write() {
            state.last_applied = top;
            state.last_durable = top;
            state.consistency = Some(consistency);
        }
    }
}

#[derive(Debug, Default)]
struct Markers {
    min_valid: OpTime,
    applied_through: OpTime,
    applied_through_writes: Vec<(OpTime, bool)>,
}

/// minValid and appliedThrough of one in-memory node.
#[derive(Debug, Default)]
pub struct MemoryConsistencyMarkers {
    markers: RwLock<Markers>,
}

impl MemoryConsistencyMarkers {
    /// Every appliedThrough write with its `set_timestamp` flag, in order.
    /// A clear shows up as a null OpTime.
    pub fn applied_through_writes(&self) -> Vec<(OpTime, bool)> {
        self.markers
            .read()
            .map(|m| m.applied_through_writes.clone())
            .unwrap_or_default()
    }
}

impl ConsistencyMarkers for MemoryConsistencyMarkers {
    fn min_valid(&self) -> OpTime {
        self.markers
            .read()
            .map(|m| m.min_valid)
            .unwrap_or_else(|_| OpTime::null())
    }

    fn set_min_valid(&self, min_valid: OpTime) {
        if let Ok(mut markers) = self.markers.write() {
            markers.min_valid = min_valid;
        }
    }

    fn applied_through(&self) -> OpTime {
        self.markers
            .read()
            .map(|m| m.applied_through)
            .unwrap_or_else(|_| OpTime::null())
    }

    fn set_applied_through(&self, op_time: OpTime, set_timestamp: bool) {
        if let Ok(mut markers) = self.markers.write() {
            markers.applied_through = op_time;
            markers.applied_through_writes.push((op_time, set_timestamp));
        }
    }

    fn clear_applied_through(&self, _write_timestamp: Timestamp) {
        if let Ok(mut markers) = self.markers.write() {
            markers.applied_through = OpTime::null();
            markers.applied_through_writes.push((OpTime::null(), false));
        }
    }
}

/// Replication process of one in-memory node.
#[derive(Debug, Default)]
pub struct MemoryReplicationProcess {
    markers: MemoryConsistencyMarkers,
    rollback_id: AtomicI32,
    fail_increment: AtomicBool,
}

impl MemoryReplicationProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers(&self) -> &MemoryConsistencyMarkers {
        &self.markers
    }

    /// Make `increment_rollback_id` fail.
    pub fn set_fail_increment(&self, fail: bool) {
        self.fail_increment.store(fail, Ordering::SeqCst);
    }
}

impl ReplicationProcess for MemoryReplicationProcess {
    fn consistency_markers(&self) -> &dyn ConsistencyMarkers {
        &self.markers
    }

    fn rollback_id(&self) -> i32 {
        self.rollback_id.load(Ordering::SeqCst)
    }

    fn increment_rollback_id(&self) -> RollbackResult<()> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(RollbackError::storage("cannot persist rollback id"));
        }
        self.rollback_id.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
