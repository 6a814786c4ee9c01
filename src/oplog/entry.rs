//! Parsed oplog entries
//!
//! Entry shape:
//!
//! ```text
//! { ts: {t, i}, t: <term>, op: "i"|"u"|"d"|"c"|"n", ns: "<db>.<coll>",
//!   ui: <uuid>, o: {...}, o2: {...}, wall: <rfc3339>,
//!   lsid: {id: <uuid>}, txnNumber: <i64>, prevOpTime: {ts, t} }
//! ```
//!
//! For commands the first field of `o` names the command.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::{OplogError, OplogResult};
use super::namespace::NamespaceString;
use super::optime::OpTime;
use crate::document::{first_field, Document};

/// Field holding the entry timestamp
pub const TIMESTAMP_FIELD: &str = "ts";
/// Field holding the wall clock time
pub const WALL_CLOCK_TIME_FIELD: &str = "wall";

/// Operation kind of an oplog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Document insert
    Insert,
    /// Document update
    Update,
    /// Document delete
    Delete,
    /// Database command
    Command,
    /// No-op marker
    Noop,
}

impl OpType {
    /// Parse the `op` field.
    pub fn parse(op: &str) -> OplogResult<Self> {
        match op {
            "i" => Ok(Self::Insert),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            "c" => Ok(Self::Command),
            "n" => Ok(Self::Noop),
            other => Err(OplogError::unknown_op_type(other)),
        }
    }

    /// Short form as stored in the `op` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Command => "c",
            Self::Noop => "n",
        }
    }
}

/// Command carried by a command entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandType {
    /// Not a command entry
    NotCommand,
    Create,
    RenameCollection,
    DbCheck,
    Drop,
    CollMod,
    ApplyOps,
    DropDatabase,
    EmptyCapped,
    ConvertToCapped,
    CreateIndexes,
    StartIndexBuild,
    CommitIndexBuild,
    AbortIndexBuild,
    DropIndexes,
    CommitTransaction,
    AbortTransaction,
    /// Any command name this parser does not know
    Unknown(String),
}

impl CommandType {
    /// Map a command name to its type.
    pub fn from_name(name: &str) -> Self {
        match name {
            "create" => Self::Create,
            "renameCollection" => Self::RenameCollection,
            "dbCheck" => Self::DbCheck,
            "drop" => Self::Drop,
            "collMod" => Self::CollMod,
            "applyOps" => Self::ApplyOps,
            "dropDatabase" => Self::DropDatabase,
            "emptycapped" => Self::EmptyCapped,
            "convertToCapped" => Self::ConvertToCapped,
            "createIndexes" => Self::CreateIndexes,
            "startIndexBuild" => Self::StartIndexBuild,
            "commitIndexBuild" => Self::CommitIndexBuild,
            "abortIndexBuild" => Self::AbortIndexBuild,
            "dropIndexes" | "deleteIndexes" => Self::DropIndexes,
            "commitTransaction" => Self::CommitTransaction,
            "abortTransaction" => Self::AbortTransaction,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Logical session information attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSessionInfo {
    /// Logical session id (`lsid.id`)
    pub session_id: Option<Uuid>,
    /// Transaction number within the session
    pub txn_number: Option<i64>,
}

/// A parsed oplog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogEntry {
    raw: Document,
    op_time: OpTime,
    op_type: OpType,
    nss: NamespaceString,
    uuid: Option<Uuid>,
    object: Document,
    object2: Option<Document>,
    wall_clock_time: DateTime<Utc>,
    session_info: OperationSessionInfo,
    prev_write_op_time_in_transaction: Option<OpTime>,
}

fn parse_uuid(field: &str, value: &Value) -> OplogResult<Uuid> {
    let text = value
        .as_str()
        .ok_or_else(|| OplogError::invalid_field(field, "expected a UUID string"))?;
    Uuid::parse_str(text).map_err(|e| OplogError::invalid_field(field, e.to_string()))
}

fn parse_object(field: &str, value: &Value) -> OplogResult<Document> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| OplogError::invalid_field(field, "expected an object"))
}

impl OplogEntry {
    /// Parse an oplog entry document.
    pub fn parse(raw: &Document) -> OplogResult<Self> {
        let op_time = OpTime::parse_from_oplog_entry(raw)?;

        let op = raw
            .get("op")
            .ok_or_else(|| OplogError::missing_field("op"))?
            .as_str()
            .ok_or_else(|| OplogError::invalid_field("op", "expected a string"))?;
        let op_type = OpType::parse(op)?;

        let ns = raw
            .get("ns")
            .ok_or_else(|| OplogError::missing_field("ns"))?
            .as_str()
            .ok_or_else(|| OplogError::invalid_field("ns", "expected a string"))?;

        let uuid = raw.get("ui").map(|v| parse_uuid("ui", v)).transpose()?;

        let object = parse_object(
            "o",
            raw.get("o").ok_or_else(|| OplogError::missing_field("o"))?,
        )?;
        let object2 = raw.get("o2").map(|v| parse_object("o2", v)).transpose()?;

        let wall = raw
            .get(WALL_CLOCK_TIME_FIELD)
            .ok_or_else(|| OplogError::missing_field(WALL_CLOCK_TIME_FIELD))?
            .as_str()
            .ok_or_else(|| OplogError::invalid_field(WALL_CLOCK_TIME_FIELD, "expected a string"))?;
        let wall_clock_time = DateTime::parse_from_rfc3339(wall)
            .map_err(|e| OplogError::invalid_field(WALL_CLOCK_TIME_FIELD, e.to_string()))?
            .with_timezone(&Utc);

        let session_id = match raw.get("lsid") {
            None => None,
            Some(lsid) => {
                let id = lsid
                    .get("id")
                    .ok_or_else(|| OplogError::missing_field("lsid.id"))?;
                Some(parse_uuid("lsid.id", id)?)
            }
        };
        let txn_number = match raw.get("txnNumber") {
            None => None,
            Some(value) => Some(
                value
                    .as_i64()
                    .ok_or_else(|| OplogError::invalid_field("txnNumber", "expected an integer"))?,
            ),
        };

        let prev_write_op_time_in_transaction = raw
            .get("prevOpTime")
            .map(OpTime::from_value)
            .transpose()?;

        Ok(Self {
            raw: raw.clone(),
            op_time,
            op_type,
            nss: NamespaceString::new(ns),
            uuid,
            object,
            object2,
            wall_clock_time,
            session_info: OperationSessionInfo {
                session_id,
                txn_number,
            },
            prev_write_op_time_in_transaction,
        })
    }

    /// The entry as it was parsed.
    pub fn raw(&self) -> &Document {
        &self.raw
    }

    pub fn op_time(&self) -> OpTime {
        self.op_time
    }

    pub fn op_type(&self) -> OpType {
        self.op_type
    }

    pub fn nss(&self) -> &NamespaceString {
        &self.nss
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// The `o` field: the document or command to apply.
    pub fn operation_to_apply(&self) -> &Document {
        &self.object
    }

    /// The `o2` field.
    pub fn object2(&self) -> Option<&Document> {
        self.object2.as_ref()
    }

    pub fn wall_clock_time(&self) -> DateTime<Utc> {
        self.wall_clock_time
    }

    pub fn session_info(&self) -> &OperationSessionInfo {
        &self.session_info
    }

    /// Previous write of the same multi-entry transaction, if linked.
    pub fn prev_write_op_time_in_transaction(&self) -> Option<OpTime> {
        self.prev_write_op_time_in_transaction
    }

    /// Command type for command entries, `NotCommand` otherwise.
    pub fn command_type(&self) -> CommandType {
        if self.op_type != OpType::Command {
            return CommandType::NotCommand;
        }
        match first_field(&self.object) {
            Some((name, _)) => CommandType::from_name(name),
            None => CommandType::Unknown(String::new()),
        }
    }

    /// Check if this entry is a non-final part of a multi-entry transaction.
    pub fn is_partial_transaction(&self) -> bool {
        self.command_type() == CommandType::ApplyOps
            && self
                .object
                .get("partialTxn")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// The `_id` of the affected document: `o2._id` for updates, `o._id`
    /// otherwise.
    pub fn id_element(&self) -> Option<&Value> {
        let source = match self.op_type {
            OpType::Update => self.object2.as_ref()?,
            _ => &self.object,
        };
        source.get("_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> OplogResult<OplogEntry> {
        OplogEntry::parse(value.as_object().unwrap())
    }

    fn base(op: &str, o: Value) -> Value {
        json!({
            "ts": {"t": 10, "i": 1},
            "t": 1,
            "op": op,
            "ns": "test.c",
            "ui": "3b241101-e2bb-4255-8caf-4136c566a962",
            "o": o,
            "wall": "2024-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_parse_insert() {
        let entry = parse(base("i", json!({"_id": 1, "x": 2}))).unwrap();
        assert_eq!(entry.op_type(), OpType::Insert);
        assert_eq!(entry.nss().ns(), "test.c");
        assert_eq!(entry.id_element(), Some(&json!(1)));
        assert_eq!(entry.command_type(), CommandType::NotCommand);
    }

    #[test]
    fn test_update_id_comes_from_o2() {
        let mut value = base("u", json!({"$set": {"x": 3}}));
        value["o2"] = json!({"_id": "abc"});
        let entry = parse(value).unwrap();
        assert_eq!(entry.id_element(), Some(&json!("abc")));
    }

    #[test]
    fn test_command_type_from_first_field() {
        let entry = parse(base("c", json!({"renameCollection": "test.a", "to": "test.b"}))).unwrap();
        assert_eq!(entry.command_type(), CommandType::RenameCollection);

        let entry = parse(base("c", json!({"deleteIndexes": "c", "index": "a_1"}))).unwrap();
        assert_eq!(entry.command_type(), CommandType::DropIndexes);

        let entry = parse(base("c", json!({"shardCollection": "c"}))).unwrap();
        assert_eq!(
            entry.command_type(),
            CommandType::Unknown("shardCollection".to_string())
        );
    }

    #[test]
    fn test_partial_transaction() {
        let entry = parse(base("c", json!({"applyOps": [], "partialTxn": true}))).unwrap();
        assert!(entry.is_partial_transaction());

        let entry = parse(base("c", json!({"applyOps": []}))).unwrap();
        assert!(!entry.is_partial_transaction());
    }

    #[test]
    fn test_session_info() {
        let mut value = base("i", json!({"_id": 1}));
        value["lsid"] = json!({"id": "9f1c2a3e-0000-4000-8000-000000000001"});
        value["txnNumber"] = json!(4);
        value["prevOpTime"] = json!({"ts": {"t": 9, "i": 1}, "t": 1});
        let entry = parse(value).unwrap();
        assert!(entry.session_info().session_id.is_some());
        assert_eq!(entry.session_info().txn_number, Some(4));
        assert_eq!(
            entry.prev_write_op_time_in_transaction().map(|o| o.ts.secs),
            Some(9)
        );
    }

    #[test]
    fn test_missing_wall_is_rejected() {
        let mut value = base("i", json!({"_id": 1}));
        value.as_object_mut().unwrap().remove("wall");
        assert!(parse(value).is_err());
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert!(parse(base("x", json!({}))).is_err());
    }
}
