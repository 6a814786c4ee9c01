//! Identity of a document to refetch from the sync source

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::document::compare_values;

/// A document touched by a rolled-back operation.
///
/// Ordered by collection UUID, then by `_id` in canonical value order. The
/// namespace is carried for locking and logging only and takes no part in
/// ordering or equality.
#[derive(Debug, Clone)]
pub struct DocId {
    /// The `_id` value
    pub id: Value,
    /// Collection UUID
    pub uuid: Uuid,
    /// Namespace the operation was recorded against
    pub ns: String,
}

impl DocId {
    pub fn new(id: Value, uuid: Uuid, ns: impl Into<String>) -> Self {
        Self {
            id,
            uuid,
            ns: ns.into(),
        }
    }
}

impl PartialEq for DocId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DocId {}

impl PartialOrd for DocId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Byte order of a UUID is the order of its hyphenated string form.
        self.uuid
            .cmp(&other.uuid)
            .then_with(|| compare_values(&self.id, &other.id))
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{_id: {}, uuid: {}, ns: {}}}", self.id, self.uuid, self.ns)
    }
}
