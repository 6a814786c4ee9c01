//! Oplog positions
//!
//! A `Timestamp` orders entries within the oplog, an `OpTime` pairs it with
//! the election term that produced the entry. `RecordId` is the storage
//! position of an entry in the local oplog collection.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{OplogError, OplogResult};
use crate::document::Document;

/// Term value of an OpTime that was never assigned a term.
pub const UNINITIALIZED_TERM: i64 = -1;

/// Logical oplog timestamp: seconds plus an increment within the second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    #[serde(rename = "t")]
    pub secs: u32,
    /// Ordinal within the second
    #[serde(rename = "i")]
    pub inc: u32,
}

impl Timestamp {
    /// Sentinel passed as the initial data timestamp to allow unstable
    /// checkpoints.
    pub const ALLOW_UNSTABLE_CHECKPOINTS_SENTINEL: Timestamp = Timestamp { secs: 0, inc: 1 };

    /// Create a new timestamp.
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    /// The null timestamp.
    pub const fn null() -> Self {
        Self { secs: 0, inc: 0 }
    }

    /// Check if this is the null timestamp.
    pub fn is_null(&self) -> bool {
        self.secs == 0 && self.inc == 0
    }

    /// Parse a timestamp from its `{t, i}` document form.
    pub fn from_value(value: &Value) -> OplogResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| OplogError::invalid_field("ts", e.to_string()))
    }

    /// Render as `{t, i}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "t": self.secs, "i": self.inc })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// Position of an operation in replicated history.
///
/// Ordering compares the term first, then the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpTime {
    /// Oplog timestamp
    pub ts: Timestamp,
    /// Election term
    pub t: i64,
}

impl OpTime {
    /// Create a new OpTime.
    pub const fn new(ts: Timestamp, term: i64) -> Self {
        Self { ts, t: term }
    }

    /// The null OpTime.
    pub const fn null() -> Self {
        Self {
            ts: Timestamp::null(),
            t: UNINITIALIZED_TERM,
        }
    }

    /// Check if this OpTime is null.
    pub fn is_null(&self) -> bool {
        self.ts.is_null()
    }

    /// The timestamp component.
    pub fn timestamp(&self) -> Timestamp {
        self.ts
    }

    /// The term component.
    pub fn term(&self) -> i64 {
        self.t
    }

    /// Extract the OpTime of an oplog entry (`ts` required, `t` optional).
    pub fn parse_from_oplog_entry(entry: &Document) -> OplogResult<Self> {
        let ts = entry
            .get("ts")
            .ok_or_else(|| OplogError::missing_field("ts"))
            .and_then(Timestamp::from_value)?;

        let term = match entry.get("t") {
            None | Some(Value::Null) => UNINITIALIZED_TERM,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| OplogError::invalid_field("t", "term must be an integer"))?,
        };

        Ok(Self::new(ts, term))
    }

    /// Parse the `{ts, t}` document form.
    pub fn from_value(value: &Value) -> OplogResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| OplogError::invalid_field("optime", "expected an object"))?;
        Self::parse_from_oplog_entry(object)
    }

    /// Render as `{ts, t}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "ts": self.ts.to_value(), "t": self.t })
    }
}

impl Default for OpTime {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.t.cmp(&other.t).then_with(|| self.ts.cmp(&other.ts))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.t)
    }
}

/// Storage position of a record within a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl RecordId {
    /// The null record id.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Check if this record id is null.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1, 5) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 0) < Timestamp::new(2, 1));
        assert!(Timestamp::null().is_null());
    }

    #[test]
    fn test_optime_orders_by_term_first() {
        let older_term = OpTime::new(Timestamp::new(10, 0), 1);
        let newer_term = OpTime::new(Timestamp::new(5, 0), 2);
        assert!(older_term < newer_term);
    }

    #[test]
    fn test_parse_from_oplog_entry() {
        let entry = json!({"ts": {"t": 5, "i": 2}, "t": 3, "op": "n"});
        let op_time = OpTime::parse_from_oplog_entry(entry.as_object().unwrap()).unwrap();
        assert_eq!(op_time, OpTime::new(Timestamp::new(5, 2), 3));
    }

    #[test]
    fn test_parse_without_term_uses_uninitialized() {
        let entry = json!({"ts": {"t": 5, "i": 2}});
        let op_time = OpTime::parse_from_oplog_entry(entry.as_object().unwrap()).unwrap();
        assert_eq!(op_time.term(), UNINITIALIZED_TERM);
    }

    #[test]
    fn test_parse_rejects_missing_ts() {
        let entry = json!({"t": 1});
        assert!(OpTime::parse_from_oplog_entry(entry.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_value_round_trip() {
        let op_time = OpTime::new(Timestamp::new(9, 1), 4);
        assert_eq!(OpTime::from_value(&op_time.to_value()).unwrap(), op_time);
    }
}
