//! Shared builders for rollback integration tests
//!
//! Oplog entries use term 1 and increment 1 unless stated otherwise, so a
//! single `secs` value identifies an entry.

#![allow(dead_code)]

use oplog_rollback::document::Document;
use oplog_rollback::memory::{Scenario, SimulatedNodes};
use oplog_rollback::oplog::{OpTime, Timestamp};
use oplog_rollback::rollback::interfaces::RollbackSource;
use oplog_rollback::rollback::{
    sync_roll_back_local_operations, update_fix_up_info_from_local_oplog_entry, FixUpInfo,
    RollbackConfig, RollbackContext, RollbackOutcome, RollbackResult,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub const WALL: &str = "2024-01-01T00:00:00Z";

pub const UUID_C: &str = "3b241101-e2bb-4255-8caf-4136c566a962";
pub const UUID_T: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
pub const UUID_OTHER: &str = "9a4f2c1e-0b7d-4e5f-8a3c-6d2e1f0b9c8a";

pub fn uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("valid test uuid")
}

pub fn doc(value: Value) -> Document {
    value.as_object().expect("test document must be an object").clone()
}

pub fn op_time(secs: u32) -> OpTime {
    OpTime::new(Timestamp::new(secs, 1), 1)
}

pub fn noop(secs: u32) -> Value {
    json!({
        "ts": {"t": secs, "i": 1}, "t": 1, "op": "n", "ns": "",
        "o": {"msg": "periodic noop"}, "wall": WALL,
    })
}

pub fn insert(secs: u32, ns: &str, ui: &str, o: Value) -> Value {
    json!({"ts": {"t": secs, "i": 1}, "t": 1, "op": "i", "ns": ns, "ui": ui, "o": o, "wall": WALL})
}

pub fn update(secs: u32, ns: &str, ui: &str, id: Value, o: Value) -> Value {
    json!({
        "ts": {"t": secs, "i": 1}, "t": 1, "op": "u", "ns": ns, "ui": ui,
        "o": o, "o2": {"_id": id}, "wall": WALL,
    })
}

pub fn delete(secs: u32, ns: &str, ui: &str, id: Value) -> Value {
    json!({"ts": {"t": secs, "i": 1}, "t": 1, "op": "d", "ns": ns, "ui": ui, "o": {"_id": id}, "wall": WALL})
}

/// A command entry on `db.$cmd`.
pub fn command(secs: u32, db: &str, ui: &str, o: Value) -> Value {
    json!({
        "ts": {"t": secs, "i": 1}, "t": 1, "op": "c", "ns": format!("{}.$cmd", db),
        "ui": ui, "o": o, "wall": WALL,
    })
}

pub fn with_o2(mut entry: Value, o2: Value) -> Value {
    entry["o2"] = o2;
    entry
}

pub fn collection(ns: &str, ui: &str, documents: Value) -> Value {
    json!({"ns": ns, "uuid": ui, "documents": documents})
}

/// Common oplog prefix shared by both nodes: noops at 1..=secs.
pub fn shared_history(secs: u32) -> Vec<Value> {
    (1..=secs).map(noop).collect()
}

pub fn scenario(value: Value) -> Scenario {
    serde_json::from_value(value).expect("valid scenario")
}

pub fn build(value: Value) -> SimulatedNodes {
    scenario(value).build().expect("scenario builds")
}

/// Run rollback once without sleeping between retries.
pub fn run(nodes: &SimulatedNodes, config: RollbackConfig) -> RollbackResult<RollbackOutcome> {
    nodes.run(config, &|_| {})
}

/// Find the common point of the scenario and classify every rolled-back
/// local entry, as the orchestrator does before fix-up.
pub fn plan(nodes: &SimulatedNodes) -> RollbackResult<FixUpInfo> {
    let ctx = RollbackContext::new(nodes.services.services(), RollbackConfig::default());
    let local_oplog = nodes.services.catalog.local_oplog();
    let mut info = FixUpInfo::new();
    let common_point = sync_roll_back_local_operations(&local_oplog, nodes.source.oplog(), |entry| {
        update_fix_up_info_from_local_oplog_entry(&ctx, &local_oplog, &mut info, entry, false)
    })?;
    info.common_point = common_point.op_time;
    info.common_point_our_disk_loc = common_point.record_id;
    info.remove_redundant_operations();
    Ok(info)
}
