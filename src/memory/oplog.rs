//! In-memory oplog

use std::sync::RwLock;

use crate::document::Document;
use crate::oplog::{OpTime, RecordId};
use crate::rollback::errors::{RollbackError, RollbackResult};
use crate::rollback::interfaces::{OplogInterface, OplogIterator};

/// Records snapshotted at iterator creation, handed out newest first.
pub(crate) struct SnapshotIterator {
    records: Vec<(Document, RecordId)>,
}

impl SnapshotIterator {
    /// `records` must be in ascending record id order.
    pub(crate) fn new(records: Vec<(Document, RecordId)>) -> Self {
        Self { records }
    }
}

impl OplogIterator for SnapshotIterator {
    fn next(&mut self) -> RollbackResult<Option<(Document, RecordId)>> {
        Ok(self.records.pop())
    }
}

/// Find the entry written at `op_time` among `records`.
pub(crate) fn find_entry<'a, I>(records: I, op_time: OpTime) -> Option<Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    records
        .into_iter()
        .find(|entry| OpTime::parse_from_oplog_entry(entry).ok() == Some(op_time))
        .cloned()
}

/// A standalone oplog. Record ids are assigned 1, 2, 3, ... in push order.
#[derive(Debug, Default)]
pub struct MemoryOplog {
    name: String,
    records: RwLock<Vec<(Document, RecordId)>>,
}

impl MemoryOplog {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Build an oplog holding `entries`, oldest first.
    pub fn from_entries(name: &str, entries: impl IntoIterator<Item = Document>) -> Self {
        let oplog = Self::new(name);
        for entry in entries {
            oplog.push(entry);
        }
        oplog
    }

    /// Append `entry` as the newest entry.
    pub fn push(&self, entry: Document) -> RecordId {
        let Ok(mut records) = self.records.write() else {
            return RecordId::null();
        };
        let record_id = RecordId(records.len() as i64 + 1);
        records.push((entry, record_id));
        record_id
    }

    /// Newest entry, or an empty document when there is none.
    pub fn top(&self) -> Document {
        self.records
            .read()
            .ok()
            .and_then(|records| records.last().map(|(entry, _)| entry.clone()))
            .unwrap_or_default()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<Document> {
        self.records
            .read()
            .map(|records| records.iter().map(|(entry, _)| entry.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OplogInterface for MemoryOplog {
    fn describe(&self) -> String {
        format!("in-memory oplog {}", self.name)
    }

    fn make_iterator(&self) -> RollbackResult<Box<dyn OplogIterator + '_>> {
        let records = self
            .records
            .read()
            .map_err(|_| RollbackError::storage("Lock poisoned"))?;
        Ok(Box::new(SnapshotIterator::new(records.clone())))
    }

    fn find_by_op_time(&self, op_time: OpTime) -> RollbackResult<Option<Document>> {
        let records = self
            .records
            .read()
            .map_err(|_| RollbackError::storage("Lock poisoned"))?;
        Ok(find_entry(records.iter().map(|(entry, _)| entry), op_time))
    }
}
