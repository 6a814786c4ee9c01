//! Everything one rollback attempt runs against

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::config::RollbackConfig;
use super::errors::{RollbackError, RollbackResult};
use super::interfaces::{
    AuthorizationManager, Catalog, DropPendingCollectionReaper, IndexBuildsCoordinator,
    KeyManagerCache, SessionCatalog, ShardIdentityRollbackNotifier, ShardRegistry, StorageEngine,
};
use crate::fail_point::{FailPoints, PauseOutcome};
use crate::locks::Locker;
use crate::observability::RollbackMetrics;

/// Local services fix-up writes through.
#[derive(Clone, Copy)]
pub struct RollbackServices<'a> {
    pub catalog: &'a dyn Catalog,
    pub storage_engine: &'a dyn StorageEngine,
    pub drop_pending_reaper: &'a dyn DropPendingCollectionReaper,
    pub index_builds: &'a dyn IndexBuildsCoordinator,
    pub auth: &'a dyn AuthorizationManager,
    pub sessions: &'a dyn SessionCatalog,
    /// Absent when no logical clock validator is configured
    pub key_manager: Option<&'a dyn KeyManagerCache>,
    /// Present on config servers only
    pub shard_registry: Option<&'a dyn ShardRegistry>,
    pub shard_identity: &'a dyn ShardIdentityRollbackNotifier,
}

/// Operation context of a rollback.
pub struct RollbackContext<'a> {
    pub services: RollbackServices<'a>,
    pub config: RollbackConfig,
    pub locker: Locker,
    pub fail_points: Arc<FailPoints>,
    pub metrics: Arc<RollbackMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl<'a> RollbackContext<'a> {
    pub fn new(services: RollbackServices<'a>, config: RollbackConfig) -> Self {
        Self {
            services,
            config,
            locker: Locker::new(),
            fail_points: Arc::new(FailPoints::new()),
            metrics: Arc::new(RollbackMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_fail_points(mut self, fail_points: Arc<FailPoints>) -> Self {
        self.fail_points = fail_points;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RollbackMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Handle another thread can raise to request shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block while fail point `name` is enabled.
    ///
    /// Shutdown while held is reported as an invariant violation.
    pub fn pause_while_set(&self, name: &str) -> RollbackResult<()> {
        match self.fail_points.pause_while_set(
            name,
            &self.shutdown,
            self.config.fail_point_poll_interval(),
        ) {
            PauseOutcome::Released => Ok(()),
            PauseOutcome::ShutdownRequested => Err(RollbackError::invariant(format!(
                "shutdown requested while fail point {} held rollback",
                name
            ))),
        }
    }
}
