//! Fail points and crash points for testing rollback
//!
//! Two kinds of hooks:
//!
//! - **Fail points** are named switches held by a `FailPoints` registry.
//!   Rollback code checks them at fixed locations to pause until the point
//!   is disabled, or to fail or exit early. They are enabled
//!   programmatically or seeded from `OPLOG_ROLLBACK_FAIL_POINT`
//!   (comma-separated names).
//!
//! - **Crash points** terminate the process immediately via
//!   `std::process::abort()` when `OPLOG_ROLLBACK_CRASH_POINT` names them.
//!   No cleanup, no unwinding, no catching.
//!
//! # Testing
//!
//! ```bash
//! OPLOG_ROLLBACK_CRASH_POINT=rollback_before_oplog_truncate cargo run -- simulate ...
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;

/// Environment variable seeding enabled fail points
pub const FAIL_POINT_ENV: &str = "OPLOG_ROLLBACK_FAIL_POINT";

/// Environment variable naming the crash point to trigger
pub const CRASH_POINT_ENV: &str = "OPLOG_ROLLBACK_CRASH_POINT";

/// Cache the crash point name to avoid repeated env var lookups
static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Check if a specific crash point is enabled
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// How a paused fail point was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// The fail point was disabled
    Released,
    /// Shutdown was requested while paused
    ShutdownRequested,
}

/// Registry of enabled fail points.
#[derive(Debug, Default)]
pub struct FailPoints {
    enabled: Mutex<HashSet<String>>,
}

impl FailPoints {
    /// Create a registry with every fail point disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded from `OPLOG_ROLLBACK_FAIL_POINT`.
    pub fn from_env() -> Self {
        let registry = Self::new();
        if let Ok(names) = std::env::var(FAIL_POINT_ENV) {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                registry.enable(name);
            }
        }
        registry
    }

    /// Enable a fail point.
    pub fn enable(&self, name: &str) {
        let mut enabled = self.enabled.lock().unwrap_or_else(|e| e.into_inner());
        enabled.insert(name.to_string());
    }

    /// Disable a fail point.
    pub fn disable(&self, name: &str) {
        let mut enabled = self.enabled.lock().unwrap_or_else(|e| e.into_inner());
        enabled.remove(name);
    }

    /// Check if a fail point is enabled.
    pub fn should_fail(&self, name: &str) -> bool {
        let enabled = self.enabled.lock().unwrap_or_else(|e| e.into_inner());
        enabled.contains(name)
    }

    /// Block while the fail point is enabled, polling every `poll`.
    ///
    /// Returns early if `shutdown` is raised; shutting down while a fail
    /// point holds rollback is a test bug the caller must report.
    pub fn pause_while_set(&self, name: &str, shutdown: &AtomicBool, poll: Duration) -> PauseOutcome {
        while self.should_fail(name) {
            if shutdown.load(Ordering::SeqCst) {
                return PauseOutcome::ShutdownRequested;
            }
            thread::sleep(poll);
        }
        PauseOutcome::Released
    }
}

/// All defined fail point and crash point names
pub mod points {
    // Fail points
    pub const ROLLBACK_HANG_AFTER_TRANSITION_TO_ROLLBACK: &str =
        "rollbackHangAfterTransitionToRollback";
    pub const ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID: &str =
        "rollbackHangThenFailAfterWritingMinValid";
    pub const ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP: &str =
        "rollbackExitEarlyAfterCollectionDrop";
    pub const ROLLBACK_HANG_BEFORE_FINISH: &str = "rollbackHangBeforeFinish";

    // Crash points
    pub const ROLLBACK_BEFORE_OPLOG_TRUNCATE: &str = "rollback_before_oplog_truncate";
    pub const ROLLBACK_AFTER_OPLOG_TRUNCATE: &str = "rollback_after_oplog_truncate";

    /// Get all fail point names
    pub fn fail_points() -> &'static [&'static str] {
        &[
            ROLLBACK_HANG_AFTER_TRANSITION_TO_ROLLBACK,
            ROLLBACK_HANG_THEN_FAIL_AFTER_WRITING_MIN_VALID,
            ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP,
            ROLLBACK_HANG_BEFORE_FINISH,
        ]
    }

    /// Get all crash point names
    pub fn crash_points() -> &'static [&'static str] {
        &[ROLLBACK_BEFORE_OPLOG_TRUNCATE, ROLLBACK_AFTER_OPLOG_TRUNCATE]
    }
}
