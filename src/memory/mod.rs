//! In-memory implementations of the rollback collaborators
//!
//! Used by tests and by the `simulate` command. Everything lives behind
//! `RwLock`s; nothing is persisted.

mod catalog;
mod oplog;
mod replication;
mod scenario;
mod services;
mod source;

pub use catalog::{CollectionState, LocalOplog, MemoryCatalog};
pub use oplog::MemoryOplog;
pub use replication::{
    MemoryConsistencyMarkers, MemoryReplicationCoordinator, MemoryReplicationProcess,
};
pub use scenario::{DropPending, NodeState, Scenario, ScenarioError, SimulatedNodes};
pub use services::{
    MemoryDropPendingReaper, MemoryIndexBuildsCoordinator, MemoryInvalidations, MemoryServices,
    MemoryStorageEngine,
};
pub use source::MemoryRollbackSource;
