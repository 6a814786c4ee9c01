//! Common point search
//!
//! Walks the local and remote oplogs newest-first in lockstep until both
//! hold an entry with the same OpTime. Every local entry passed on the
//! way is handed to a callback, which is how rolled-back operations get
//! classified.

use crate::document::Document;
use crate::observability::Logger;
use crate::oplog::{OpTime, RecordId};

use super::errors::{RollbackError, RollbackResult};
use super::interfaces::{OplogInterface, OplogIterator};

/// Local history older than the remote top by more than this is unusual
/// enough to report.
const LONG_ROLLBACK_WARN_SECS: i64 = 1800;

/// The newest entry present in both oplogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackCommonPoint {
    pub op_time: OpTime,
    /// Record id of the entry in the local oplog
    pub record_id: RecordId,
}

/// Local side of the search: a cursor plus the callback for passed entries.
struct RollBackLocalOperations<'a, F> {
    local: Box<dyn OplogIterator + 'a>,
    current: Option<(Document, OpTime, RecordId)>,
    scanned: u64,
    on_local_operation: F,
}

impl<'a, F> RollBackLocalOperations<'a, F>
where
    F: FnMut(&Document) -> RollbackResult<()>,
{
    fn advance(&mut self) -> RollbackResult<bool> {
        match self.local.next()? {
            Some((entry, record_id)) => {
                let op_time = OpTime::parse_from_oplog_entry(&entry)?;
                self.current = Some((entry, op_time, record_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn current_position(&self) -> Option<(OpTime, RecordId)> {
        self.current
            .as_ref()
            .map(|(_, op_time, record_id)| (*op_time, *record_id))
    }

    fn roll_back_current(&mut self) -> RollbackResult<()> {
        self.scanned += 1;
        if let Some((entry, _, _)) = &self.current {
            (self.on_local_operation)(entry)?;
        }
        if !self.advance()? {
            return Err(RollbackError::no_matching_document(
                "reached beginning of local oplog",
            ));
        }
        Ok(())
    }

    /// Process one remote entry. `Ok(None)` means keep scanning the remote.
    fn on_remote_operation(&mut self, remote: OpTime) -> RollbackResult<Option<RollbackCommonPoint>> {
        if self.current.is_none() {
            if !self.advance()? {
                return Err(RollbackError::oplog_start_missing("no oplog during initsync"));
            }
            if let Some((_, local, _)) = &self.current {
                let diff = i64::from(local.ts.secs) - i64::from(remote.ts.secs);
                if diff > LONG_ROLLBACK_WARN_SECS {
                    Logger::warn(
                        "ROLLBACK_LONG_TIME_PERIOD",
                        &[("diff_secs", &diff.to_string())],
                    );
                }
            }
        }

        while let Some((local, _)) = self.current_position() {
            if local.ts <= remote.ts {
                break;
            }
            self.roll_back_current()?;
        }

        let Some((local, record_id)) = self.current_position() else {
            return Ok(None);
        };
        if local.ts == remote.ts {
            if local.t == remote.t {
                self.scanned += 1;
                return Ok(Some(RollbackCommonPoint {
                    op_time: local,
                    record_id,
                }));
            }
            // Same timestamp written in a different term: ours diverged.
            self.roll_back_current()?;
        }
        Ok(None)
    }
}

/// Find the common point of `local` and `remote`, calling
/// `on_local_operation` for every local entry newer than it.
pub fn sync_roll_back_local_operations<F>(
    local: &dyn OplogInterface,
    remote: &dyn OplogInterface,
    on_local_operation: F,
) -> RollbackResult<RollbackCommonPoint>
where
    F: FnMut(&Document) -> RollbackResult<()>,
{
    let mut remote_iter = remote.make_iterator()?;
    let Some((mut remote_entry, _)) = remote_iter.next()? else {
        return Err(RollbackError::oplog_start_missing(format!(
            "remote oplog empty or unreadable: {}",
            remote.describe()
        )));
    };

    let mut finder = RollBackLocalOperations {
        local: local.make_iterator()?,
        current: None,
        scanned: 0,
        on_local_operation,
    };

    loop {
        let remote_op_time = OpTime::parse_from_oplog_entry(&remote_entry).map_err(|e| {
            RollbackError::sync_source(format!("malformed remote oplog entry: {}", e.message))
        })?;

        if let Some(common_point) = finder.on_remote_operation(remote_op_time)? {
            Logger::trace(
                "ROLLBACK_LOCAL_OPERATIONS_SCANNED",
                &[("scanned", &finder.scanned.to_string())],
            );
            return Ok(common_point);
        }

        match remote_iter.next()? {
            Some((entry, _)) => remote_entry = entry,
            None => {
                return Err(RollbackError::no_matching_document(format!(
                    "reached beginning of remote oplog: {}",
                    remote.describe()
                )))
            }
        }
    }
}
