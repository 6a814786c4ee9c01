//! Rollback orchestration
//!
//! State machine: SECONDARY -> ROLLBACK -> RECOVERING.
//!
//! Once ROLLBACK is entered the member always leaves through RECOVERING,
//! whether fix-up succeeded or failed recoverably: a partial fix-up leaves
//! data that must not be served until replay reaches minValid. An
//! unrecoverable failure never reaches RECOVERING; the caller terminates.

use super::classifier::update_fix_up_info_from_local_oplog_entry;
use super::common_point::sync_roll_back_local_operations;
use super::context::RollbackContext;
use super::errors::{RollbackError, RollbackErrorKind, RollbackResult};
use super::executor::sync_fix_up;
use super::fixup_info::{FixUpInfo, IndexBuilds};
use super::interfaces::{
    MemberState, OplogInterface, ReplicationCoordinator, ReplicationProcess, RollbackSource,
};
use crate::fail_point::points;
use crate::observability::{log_event, log_event_with_fields, Event, Logger, ObservationScope};
use crate::oplog::NamespaceString;

/// How a rollback attempt ended, short of an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Fix-up finished and the member is RECOVERING
    Completed,
    /// Fix-up failed recoverably; the member is RECOVERING and rollback
    /// must be retried from scratch
    RetryLater,
    /// The member could not enter ROLLBACK; nothing was changed
    TransitionRefused,
}

/// Find the common point with `source` and undo everything after it.
///
/// `required_rbid` is the sync source rollback id observed when the need
/// to roll back was detected. Index builds the caller aborted before
/// calling are restarted once fix-up is done.
pub fn sync_rollback(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    source: &dyn RollbackSource,
    aborted_index_builds: &IndexBuilds,
    required_rbid: i32,
    repl_coord: &dyn ReplicationCoordinator,
    repl_process: &dyn ReplicationProcess,
) -> RollbackResult<()> {
    let result = run_sync_rollback(
        ctx,
        local_oplog,
        source,
        aborted_index_builds,
        required_rbid,
        repl_coord,
        repl_process,
    );

    let min_valid = repl_process.consistency_markers().min_valid();
    Logger::info(
        "ROLLBACK_FINISHED",
        &[("min_valid", &min_valid.to_string())],
    );
    result
}

fn run_sync_rollback(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    source: &dyn RollbackSource,
    aborted_index_builds: &IndexBuilds,
    required_rbid: i32,
    repl_coord: &dyn ReplicationCoordinator,
    repl_process: &dyn ReplicationProcess,
) -> RollbackResult<()> {
    if ctx.locker.is_locked() {
        return Err(RollbackError::invariant("rollback must start with no locks held"));
    }

    let mut how = FixUpInfo::new();
    how.local_top_of_oplog = repl_coord.my_last_applied_op_time();
    Logger::info(
        "ROLLBACK_STARTING",
        &[
            ("local_top", &how.local_top_of_oplog.to_string()),
            ("sync_source", &source.source()),
        ],
    );

    how.rbid = source.rollback_id()?;
    if how.rbid != required_rbid {
        return Err(RollbackError::rollback_id_changed(
            "Upstream node rolled back. Need to retry our rollback.",
        ));
    }

    how.transaction_table_uuid = ctx
        .services
        .catalog
        .lookup_uuid_by_nss(&NamespaceString::session_transactions_table());
    how.index_builds_to_restart.extend(
        aborted_index_builds
            .iter()
            .map(|(build_uuid, details)| (*build_uuid, details.clone())),
    );

    let scope = ObservationScope::new("ROLLBACK_FIND_COMMON_POINT");
    let found = sync_roll_back_local_operations(local_oplog, source.oplog(), |operation| {
        update_fix_up_info_from_local_oplog_entry(ctx, local_oplog, &mut how, operation, false)
    });
    let common_point = match found {
        Ok(common_point) => common_point,
        Err(e) => {
            scope.fail(&e.to_string());
            return Err(match e.kind {
                RollbackErrorKind::OplogStartMissing | RollbackErrorKind::Unrecoverable => e,
                _ => e.into_unrecoverable(
                    "need to rollback, but unable to determine common point between local and \
                     remote oplog",
                ),
            });
        }
    };
    scope.complete();

    how.common_point = common_point.op_time;
    how.common_point_our_disk_loc = common_point.record_id;
    how.remove_redundant_operations();
    log_event_with_fields(
        Event::CommonPointFound,
        &[
            ("common_point", &how.common_point.to_string()),
            ("record_id", &how.common_point_our_disk_loc.to_string()),
        ],
    );

    // Majority committed writes are never rolled back.
    let last_committed = repl_coord.last_committed_op_time();
    let committed_snapshot = repl_coord.current_committed_snapshot_op_time();
    for (name, op_time) in [
        ("last committed", last_committed),
        ("committed snapshot", committed_snapshot),
    ] {
        if how.common_point.ts < op_time.ts || how.common_point < op_time {
            return Err(RollbackError::invariant(format!(
                "common point {} is behind the {} OpTime {}",
                how.common_point, name, op_time
            )));
        }
    }

    let fixed_up = sync_fix_up(ctx, &how, source, repl_coord, repl_process);

    // Even a failed fix-up may have changed local data; readers that cached
    // the rollback id must notice.
    repl_process.increment_rollback_id().map_err(|e| {
        Logger::fatal("ROLLBACK_INCREMENT_RBID_FAILED", &[("error", &e.to_string())]);
        RollbackError::fatal(format!("failed to increment rollback id: {}", e))
    })?;
    fixed_up?;

    if ctx
        .fail_points
        .should_fail(points::ROLLBACK_EXIT_EARLY_AFTER_COLLECTION_DROP)
    {
        return Err(RollbackError::namespace_not_found(
            "Failing rollback because rollbackExitEarlyAfterCollectionDrop fail point enabled.",
        ));
    }

    if ctx.fail_points.should_fail(points::ROLLBACK_HANG_BEFORE_FINISH) {
        Logger::info(
            "ROLLBACK_FAIL_POINT_HANG",
            &[("fail_point", points::ROLLBACK_HANG_BEFORE_FINISH)],
        );
        ctx.pause_while_set(points::ROLLBACK_HANG_BEFORE_FINISH)?;
    }
    Ok(())
}

/// Run one rollback attempt, moving the member through ROLLBACK.
///
/// Unrecoverable failures are returned as `Err`; the member is left in
/// ROLLBACK and must not keep running. Recoverable failures sleep for the
/// configured backoff through `sleep_secs` and report `RetryLater`.
#[allow(clippy::too_many_arguments)]
pub fn rollback(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    source: &dyn RollbackSource,
    aborted_index_builds: &IndexBuilds,
    required_rbid: i32,
    repl_coord: &dyn ReplicationCoordinator,
    repl_process: &dyn ReplicationProcess,
    sleep_secs: &dyn Fn(u64),
) -> RollbackResult<RollbackOutcome> {
    ctx.metrics.increment_attempts();

    // Refused when, for example, the member was elected primary meanwhile.
    if let Err(e) = repl_coord.set_follower_mode_strict(MemberState::Rollback) {
        log_event_with_fields(
            Event::RollbackTransitionRefused,
            &[
                ("error", &e.to_string()),
                ("from", &repl_coord.member_state().to_string()),
                ("to", &MemberState::Rollback.to_string()),
            ],
        );
        return Ok(RollbackOutcome::TransitionRefused);
    }
    log_event_with_fields(Event::RollbackStart, &[("sync_source", &source.source())]);

    if ctx
        .fail_points
        .should_fail(points::ROLLBACK_HANG_AFTER_TRANSITION_TO_ROLLBACK)
    {
        Logger::info(
            "ROLLBACK_FAIL_POINT_HANG",
            &[("fail_point", points::ROLLBACK_HANG_AFTER_TRANSITION_TO_ROLLBACK)],
        );
        ctx.pause_while_set(points::ROLLBACK_HANG_AFTER_TRANSITION_TO_ROLLBACK)?;
    }

    let outcome = match sync_rollback(
        ctx,
        local_oplog,
        source,
        aborted_index_builds,
        required_rbid,
        repl_coord,
        repl_process,
    ) {
        Ok(()) => RollbackOutcome::Completed,
        Err(e) if e.is_unrecoverable() => {
            ctx.metrics.increment_fatal_failures();
            log_event_with_fields(
                Event::RollbackFatal,
                &[
                    ("error", &e.to_string()),
                    ("reason", "Unable to complete rollback. A full resync may be needed"),
                ],
            );
            return Err(e);
        }
        Err(e) => {
            log_event_with_fields(
                Event::RollbackRetry,
                &[
                    ("applied_through", &repl_coord.my_last_applied_op_time().to_string()),
                    ("error", &e.to_string()),
                    ("min_valid", &repl_process.consistency_markers().min_valid().to_string()),
                ],
            );
            ctx.metrics.increment_retries();
            // Gives an upstream node that rolled back time to settle.
            sleep_secs(ctx.config.retry_backoff_secs);
            RollbackOutcome::RetryLater
        }
    };

    // A crash after leaving ROLLBACK must not resurrect rolled-back data.
    ctx.services.storage_engine.wait_until_durable();

    if ctx.services.shard_identity.did_rollback_happen() {
        let e = RollbackError::fatal(
            "shardIdentity document rollback detected. Shutting down to clear in-memory sharding \
             state. Restarting this process should safely return it to a healthy state",
        );
        ctx.metrics.increment_fatal_failures();
        log_event_with_fields(Event::RollbackFatal, &[("error", &e.to_string())]);
        return Err(e);
    }

    if let Err(e) = repl_coord.set_follower_mode(MemberState::Recovering) {
        let e = RollbackError::fatal(format!(
            "Failed to transition into {}; expected to be in state {}; found self in {}: {}",
            MemberState::Recovering,
            MemberState::Rollback,
            repl_coord.member_state(),
            e
        ));
        ctx.metrics.increment_fatal_failures();
        log_event_with_fields(Event::RollbackFatal, &[("error", &e.to_string())]);
        return Err(e);
    }

    if outcome == RollbackOutcome::Completed {
        ctx.metrics.increment_completions();
        log_event(Event::RollbackComplete);
    }
    Ok(outcome)
}

/// `rollback`, aborting the process on an unrecoverable failure.
#[allow(clippy::too_many_arguments)]
pub fn rollback_or_terminate(
    ctx: &RollbackContext<'_>,
    local_oplog: &dyn OplogInterface,
    source: &dyn RollbackSource,
    aborted_index_builds: &IndexBuilds,
    required_rbid: i32,
    repl_coord: &dyn ReplicationCoordinator,
    repl_process: &dyn ReplicationProcess,
    sleep_secs: &dyn Fn(u64),
) -> RollbackOutcome {
    match rollback(
        ctx,
        local_oplog,
        source,
        aborted_index_builds,
        required_rbid,
        repl_coord,
        repl_process,
        sleep_secs,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            Logger::fatal("ROLLBACK_TERMINATING", &[("error", &e.to_string())]);
            std::process::abort();
        }
    }
}
