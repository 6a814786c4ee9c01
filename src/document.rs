//! Document helpers shared by the oplog parser and the rollback core
//!
//! Documents are JSON objects with insertion order preserved, so the first
//! field of a command object is the command name.
//!
//! Value comparison follows the canonical BSON type order restricted to the
//! JSON types:
//!
//! ```text
//! null < numbers < strings < objects < arrays < booleans
//! ```

use std::cmp::Ordering;
use std::io;

use serde_json::{Map, Value};

/// A document as stored in collections and carried by oplog entries.
pub type Document = Map<String, Value>;

/// Canonical type bracket of a value.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 6,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    // NaN sorts below every other number.
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn compare_objects(a: &Document, b: &Document) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((lk, lv)), Some((rk, rv))) => {
                let ordering = type_rank(lv)
                    .cmp(&type_rank(rv))
                    .then_with(|| lk.cmp(rk))
                    .then_with(|| compare_values(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Compare two values in canonical order, ignoring any enclosing field name.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Object(x), Value::Object(y)) => compare_objects(x, y),
        (Value::Array(x), Value::Array(y)) => {
            for (lv, rv) in x.iter().zip(y.iter()) {
                let ordering = compare_values(lv, rv);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Returns true if both values are equal under canonical comparison.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Byte counter used to measure encoded sizes without buffering.
struct CountingWriter(usize);

impl io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encoded size of a document in bytes.
pub fn encoded_size(document: &Document) -> usize {
    let mut counter = CountingWriter(0);
    match serde_json::to_writer(&mut counter, document) {
        Ok(()) => counter.0,
        // Unencodable documents are treated as unbounded.
        Err(_) => usize::MAX,
    }
}

/// Build the `{_id: <id>}` query used to address a single document.
pub fn id_query(id: &Value) -> Document {
    let mut query = Document::new();
    query.insert("_id".to_string(), id.clone());
    query
}

/// Returns the first field of a document, if any.
pub fn first_field(document: &Document) -> Option<(&String, &Value)> {
    document.iter().next()
}
