//! Two-node rollback scenarios
//!
//! A scenario describes the diverged local node and its sync source as
//! JSON: collections with their documents and indexes, plus each oplog.
//!
//! ```json
//! {
//!   "local":  {"collections": [...], "oplog": [...]},
//!   "remote": {"collections": [...], "oplog": [...]},
//!   "last_committed": {"ts": {"t": 4, "i": 1}, "t": 1}
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::catalog::{CollectionState, MemoryCatalog};
use super::oplog::MemoryOplog;
use super::replication::{MemoryReplicationCoordinator, MemoryReplicationProcess};
use super::services::MemoryServices;
use super::source::MemoryRollbackSource;
use crate::document::Document;
use crate::fail_point::{points, FailPoints};
use crate::observability::RollbackMetrics;
use crate::oplog::{NamespaceString, OpTime};
use crate::rollback::config::RollbackConfig;
use crate::rollback::context::RollbackContext;
use crate::rollback::errors::RollbackError;
use crate::rollback::fixup_info::IndexBuilds;
use crate::rollback::interfaces::{ConsistencyMarkers, ReplicationCoordinator, ReplicationProcess};
use crate::rollback::orchestrator::{rollback, RollbackOutcome};

/// Scenario loading and setup errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Io(String),

    #[error("Invalid scenario JSON: {0}")]
    Parse(String),

    #[error("Invalid scenario: {0}")]
    Setup(#[from] RollbackError),

    #[error("Unknown fail point: {0}")]
    UnknownFailPoint(String),
}

/// State of one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub collections: Vec<CollectionState>,
    /// Oplog entries, oldest first
    #[serde(default)]
    pub oplog: Vec<Document>,
}

/// A collection the local node dropped two-phase and has not reaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropPending {
    pub op_time: OpTime,
    /// Namespace before the drop
    pub ns: NamespaceString,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub local: NodeState,
    pub remote: NodeState,
    /// Majority commit point of the set; null when absent
    #[serde(default)]
    pub last_committed: Option<OpTime>,
    #[serde(default)]
    pub remote_rollback_id: i32,
    #[serde(default)]
    pub drop_pending: Vec<DropPending>,
    /// Fail points enabled for the run
    #[serde(default)]
    pub fail_points: Vec<String>,
}

impl Scenario {
    /// Load a scenario from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ScenarioError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| ScenarioError::Parse(e.to_string()))
    }

    /// Materialize both nodes.
    pub fn build(&self) -> Result<SimulatedNodes, ScenarioError> {
        let local = Arc::new(MemoryCatalog::new());
        for collection in &self.local.collections {
            local.create_collection(collection.clone())?;
        }
        for entry in &self.local.oplog {
            local.append_oplog(entry.clone())?;
        }

        let remote = Arc::new(MemoryCatalog::new());
        for collection in &self.remote.collections {
            remote.create_collection(collection.clone())?;
        }
        let remote_oplog = MemoryOplog::from_entries("remote", self.remote.oplog.iter().cloned());
        let source = MemoryRollbackSource::new("remote:27017", remote_oplog, remote);
        source.set_rollback_id(self.remote_rollback_id);

        let services = MemoryServices::with_catalog(Arc::clone(&local));
        for pending in &self.drop_pending {
            services.drop_pending_reaper.add_drop_pending_namespace(
                pending.op_time,
                pending.ns.make_drop_pending_namespace(pending.op_time),
            );
        }

        let coordinator = MemoryReplicationCoordinator::new(local);
        if let Some(last_committed) = self.last_committed {
            coordinator.set_last_committed(last_committed);
        }

        // Fail points named in the environment apply to every scenario.
        let fail_points = FailPoints::from_env();
        for name in &self.fail_points {
            if !points::fail_points().contains(&name.as_str()) {
                return Err(ScenarioError::UnknownFailPoint(name.clone()));
            }
            fail_points.enable(name);
        }

        Ok(SimulatedNodes {
            services,
            coordinator,
            process: MemoryReplicationProcess::new(),
            source,
            required_rbid: self.remote_rollback_id,
            fail_points: Arc::new(fail_points),
            metrics: Arc::new(RollbackMetrics::new()),
        })
    }
}

/// Both nodes of a scenario, ready to roll back.
pub struct SimulatedNodes {
    pub services: MemoryServices,
    pub coordinator: MemoryReplicationCoordinator,
    pub process: MemoryReplicationProcess,
    pub source: MemoryRollbackSource,
    pub required_rbid: i32,
    pub fail_points: Arc<FailPoints>,
    /// Counters shared by every run
    pub metrics: Arc<RollbackMetrics>,
}

impl SimulatedNodes {
    /// Roll the local node back against the source.
    pub fn run(
        &self,
        config: RollbackConfig,
        sleep_secs: &dyn Fn(u64),
    ) -> Result<RollbackOutcome, RollbackError> {
        let ctx = RollbackContext::new(self.services.services(), config)
            .with_fail_points(Arc::clone(&self.fail_points))
            .with_metrics(Arc::clone(&self.metrics));
        let local_oplog = self.services.catalog.local_oplog();
        rollback(
            &ctx,
            &local_oplog,
            &self.source,
            &IndexBuilds::new(),
            self.required_rbid,
            &self.coordinator,
            &self.process,
            sleep_secs,
        )
    }

    /// JSON view of the local node.
    pub fn report(&self) -> Value {
        let markers = self.process.consistency_markers();
        let oplog: Vec<Value> = self
            .services
            .catalog
            .documents(&NamespaceString::rs_oplog())
            .into_iter()
            .map(Value::Object)
            .collect();
        json!({
            "member_state": self.coordinator.member_state().to_string(),
            "rollback_id": self.process.rollback_id(),
            "min_valid": markers.min_valid().to_value(),
            "last_applied": self.coordinator.my_last_applied_op_time().to_value(),
            "collections": self.services.catalog.snapshot(),
            "oplog": oplog,
            "metrics": serde_json::to_value(self.metrics.snapshot()).unwrap_or_default(),
        })
    }
}
