//! Rollback via refetch
//!
//! A member whose oplog diverged from its sync source undoes every local
//! operation newer than the last entry both oplogs share:
//!
//! 1. `common_point` walks both oplogs backwards to that entry
//! 2. `classifier` records how to undo each local entry passed on the way
//!    into a `FixUpInfo`
//! 3. `executor` applies the `FixUpInfo`, refetching authoritative
//!    documents from the sync source, then truncates the local oplog
//! 4. `orchestrator` drives the member through ROLLBACK to RECOVERING
//!
//! All collaborators (catalog, storage engine, sync source, replication
//! coordinator) are reached through the traits in `interfaces`.

pub mod classifier;
pub mod common_point;
pub mod config;
pub mod context;
pub mod doc_id;
pub mod errors;
pub mod executor;
pub mod fixup_info;
pub mod interfaces;
pub mod options;
pub mod orchestrator;
pub mod remove_saver;

pub use classifier::update_fix_up_info_from_local_oplog_entry;
pub use common_point::{sync_roll_back_local_operations, RollbackCommonPoint};
pub use config::{ClusterRole, ConfigError, RollbackConfig};
pub use context::{RollbackContext, RollbackServices};
pub use doc_id::DocId;
pub use errors::{RollbackError, RollbackErrorKind, RollbackResult};
pub use executor::{check_rbid_and_update_min_valid, sync_fix_up};
pub use fixup_info::{FixUpInfo, IndexBuildDetails, IndexBuilds, RenameCollectionInfo};
pub use orchestrator::{rollback, rollback_or_terminate, sync_rollback, RollbackOutcome};
