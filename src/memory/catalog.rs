//! In-memory collection catalog
//!
//! Collections are keyed by UUID. Documents live in record id order, which
//! is also insertion order, so capped truncation and the local oplog (a
//! capped collection like any other) behave like their on-disk versions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::oplog::{find_entry, SnapshotIterator};
use crate::document::{values_equal, Document};
use crate::oplog::{NamespaceString, OpTime, RecordId};
use crate::rollback::errors::{RollbackError, RollbackResult};
use crate::rollback::interfaces::{Catalog, IndexState, OplogInterface, OplogIterator};
use crate::rollback::options::{CollectionOptions, ValidationAction, ValidationLevel};

/// Serializable description of one collection, used to seed and dump a
/// catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub ns: NamespaceString,
    pub uuid: Uuid,
    #[serde(default)]
    pub capped: bool,
    #[serde(default)]
    pub options: Document,
    /// Specs of ready indexes
    #[serde(default)]
    pub indexes: Vec<Document>,
    /// Specs of indexes still being built
    #[serde(default)]
    pub unfinished_indexes: Vec<Document>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone)]
struct Index {
    spec: Document,
    state: IndexState,
}

#[derive(Debug, Clone, Default)]
struct Collection {
    nss: NamespaceString,
    capped: bool,
    options: CollectionOptions,
    indexes: BTreeMap<String, Index>,
    records: BTreeMap<RecordId, Document>,
    next_record: i64,
}

impl Collection {
    fn insert(&mut self, document: Document) -> RecordId {
        self.next_record += 1;
        let record_id = RecordId(self.next_record);
        self.records.insert(record_id, document);
        record_id
    }

    fn find_by_id(&self, id: &Value) -> Option<(RecordId, &Document)> {
        self.records
            .iter()
            .find(|(_, document)| document.get("_id").is_some_and(|v| values_equal(v, id)))
            .map(|(record_id, document)| (*record_id, document))
    }
}

fn index_name(spec: &Document) -> RollbackResult<String> {
    spec.get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RollbackError::storage("index spec has no name"))
}

/// A catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    collections: RwLock<BTreeMap<Uuid, Collection>>,
    fail_capped_truncate: AtomicBool,
}

impl MemoryCatalog {
    /// An empty catalog holding only an empty local oplog.
    pub fn new() -> Self {
        let catalog = Self::default();
        let oplog = CollectionState {
            ns: NamespaceString::rs_oplog(),
            uuid: Uuid::new_v4(),
            capped: true,
            ..CollectionState::default()
        };
        // A fresh catalog has no name clashes.
        let _ = catalog.create_collection(oplog);
        catalog
    }

    fn read(&self) -> RollbackResult<std::sync::RwLockReadGuard<'_, BTreeMap<Uuid, Collection>>> {
        self.collections
            .read()
            .map_err(|_| RollbackError::storage("Lock poisoned"))
    }

    fn write(
        &self,
    ) -> RollbackResult<std::sync::RwLockWriteGuard<'_, BTreeMap<Uuid, Collection>>> {
        self.collections
            .write()
            .map_err(|_| RollbackError::storage("Lock poisoned"))
    }

    /// Add a collection with its indexes and documents.
    pub fn create_collection(&self, state: CollectionState) -> RollbackResult<()> {
        let mut collections = self.write()?;
        if collections.values().any(|c| c.nss == state.ns) {
            return Err(RollbackError::namespace_exists(state.ns.ns()));
        }
        let options = CollectionOptions::parse(&state.options).map_err(RollbackError::storage)?;
        let mut collection = Collection {
            nss: state.ns,
            capped: state.capped,
            options,
            ..Collection::default()
        };
        for (specs, index_state) in [
            (state.indexes, IndexState::Ready),
            (state.unfinished_indexes, IndexState::Unfinished),
        ] {
            for spec in specs {
                let name = index_name(&spec)?;
                collection.indexes.insert(name, Index { spec, state: index_state });
            }
        }
        for document in state.documents {
            collection.insert(document);
        }
        collections.insert(state.uuid, collection);
        Ok(())
    }

    /// Insert a document, returning its record id.
    pub fn insert(&self, uuid: Uuid, document: Document) -> RollbackResult<RecordId> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        Ok(collection.insert(document))
    }

    /// Append an entry to the local oplog.
    pub fn append_oplog(&self, entry: Document) -> RollbackResult<RecordId> {
        let uuid = self
            .lookup_uuid_by_nss(&NamespaceString::rs_oplog())
            .ok_or_else(|| RollbackError::namespace_not_found("local.oplog.rs"))?;
        self.insert(uuid, entry)
    }

    /// Make `capped_truncate_after` fail on every collection but the oplog.
    pub fn set_fail_capped_truncate(&self, fail: bool) {
        self.fail_capped_truncate.store(fail, Ordering::SeqCst);
    }

    /// Documents of `nss` in record id order.
    pub fn documents(&self, nss: &NamespaceString) -> Vec<Document> {
        self.collections
            .read()
            .map(|collections| {
                collections
                    .values()
                    .find(|c| &c.nss == nss)
                    .map(|c| c.records.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Spec of index `name` on `uuid`, if present in any state.
    pub fn index_spec(&self, uuid: Uuid, name: &str) -> Option<Document> {
        self.collections.read().ok().and_then(|collections| {
            collections
                .get(&uuid)
                .and_then(|c| c.indexes.get(name))
                .map(|index| index.spec.clone())
        })
    }

    /// Options of collection `uuid`.
    pub fn options(&self, uuid: Uuid) -> Option<CollectionOptions> {
        self.collections
            .read()
            .ok()
            .and_then(|collections| collections.get(&uuid).map(|c| c.options.clone()))
    }

    /// Dump every collection except the local oplog.
    pub fn snapshot(&self) -> Vec<CollectionState> {
        let oplog = NamespaceString::rs_oplog();
        let Ok(collections) = self.collections.read() else {
            return Vec::new();
        };
        collections
            .iter()
            .filter(|(_, c)| c.nss != oplog)
            .map(|(uuid, c)| {
                let specs = |state: IndexState| -> Vec<Document> {
                    c.indexes
                        .values()
                        .filter(|index| index.state == state)
                        .map(|index| index.spec.clone())
                        .collect()
                };
                CollectionState {
                    ns: c.nss.clone(),
                    uuid: *uuid,
                    capped: c.capped,
                    options: c.options.to_document(),
                    indexes: specs(IndexState::Ready),
                    unfinished_indexes: specs(IndexState::Unfinished),
                    documents: c.records.values().cloned().collect(),
                }
            })
            .collect()
    }

    /// The local oplog, read through the catalog.
    pub fn local_oplog(&self) -> LocalOplog<'_> {
        LocalOplog { catalog: self }
    }

    fn oplog_records(&self) -> RollbackResult<Vec<(Document, RecordId)>> {
        let oplog = NamespaceString::rs_oplog();
        let collections = self.read()?;
        let collection = collections
            .values()
            .find(|c| c.nss == oplog)
            .ok_or_else(|| RollbackError::namespace_not_found(oplog.ns()))?;
        Ok(collection
            .records
            .iter()
            .map(|(record_id, entry)| (entry.clone(), *record_id))
            .collect())
    }

    /// OpTime of the newest local oplog entry.
    pub fn top_of_oplog(&self) -> Option<OpTime> {
        self.oplog_records()
            .ok()?
            .last()
            .and_then(|(entry, _)| OpTime::parse_from_oplog_entry(entry).ok())
    }
}

/// `local.oplog.rs` of a `MemoryCatalog`.
pub struct LocalOplog<'a> {
    catalog: &'a MemoryCatalog,
}

impl OplogInterface for LocalOplog<'_> {
    fn describe(&self) -> String {
        NamespaceString::rs_oplog().ns()
    }

    fn make_iterator(&self) -> RollbackResult<Box<dyn OplogIterator + '_>> {
        Ok(Box::new(SnapshotIterator::new(self.catalog.oplog_records()?)))
    }

    fn find_by_op_time(&self, op_time: OpTime) -> RollbackResult<Option<Document>> {
        let records = self.catalog.oplog_records()?;
        Ok(find_entry(records.iter().map(|(entry, _)| entry), op_time))
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_nss_by_uuid(&self, uuid: Uuid) -> Option<NamespaceString> {
        self.collections
            .read()
            .ok()
            .and_then(|collections| collections.get(&uuid).map(|c| c.nss.clone()))
    }

    fn lookup_uuid_by_nss(&self, nss: &NamespaceString) -> Option<Uuid> {
        self.collections.read().ok().and_then(|collections| {
            collections
                .iter()
                .find(|(_, c)| &c.nss == nss)
                .map(|(uuid, _)| *uuid)
        })
    }

    fn database_exists(&self, db: &str) -> bool {
        self.collections
            .read()
            .map(|collections| collections.values().any(|c| c.nss.db() == db))
            .unwrap_or_default()
    }

    fn is_capped(&self, uuid: Uuid) -> RollbackResult<bool> {
        self.read()?
            .get(&uuid)
            .map(|c| c.capped)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))
    }

    fn find_index(&self, uuid: Uuid, name: &str) -> Option<IndexState> {
        self.collections.read().ok().and_then(|collections| {
            collections
                .get(&uuid)
                .and_then(|c| c.indexes.get(name))
                .map(|index| index.state)
        })
    }

    fn drop_index(&self, uuid: Uuid, name: &str) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        match collection.indexes.get(name).map(|index| index.state) {
            Some(IndexState::Ready) => {
                collection.indexes.remove(name);
                Ok(())
            }
            Some(IndexState::Unfinished) => Err(RollbackError::storage(format!(
                "index {} is still being built",
                name
            ))),
            None => Err(RollbackError::storage(format!("index not found: {}", name))),
        }
    }

    fn drop_unfinished_index(&self, uuid: Uuid, name: &str) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        match collection.indexes.get(name).map(|index| index.state) {
            Some(IndexState::Unfinished) => {
                collection.indexes.remove(name);
                Ok(())
            }
            Some(IndexState::Ready) => Err(RollbackError::storage(format!(
                "index {} is not being built",
                name
            ))),
            None => Err(RollbackError::storage(format!("index not found: {}", name))),
        }
    }

    fn create_index(&self, uuid: Uuid, spec: &Document) -> RollbackResult<()> {
        let name = index_name(spec)?;
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        if let Some(existing) = collection.indexes.get(&name) {
            // Re-creating an identical index is a no-op.
            if values_equal(
                &Value::Object(existing.spec.clone()),
                &Value::Object(spec.clone()),
            ) {
                return Ok(());
            }
            return Err(RollbackError::storage(format!(
                "index {} already exists with a different spec",
                name
            )));
        }
        collection.indexes.insert(
            name,
            Index {
                spec: spec.clone(),
                state: IndexState::Ready,
            },
        );
        Ok(())
    }

    fn drop_collection_even_if_system(&self, nss: &NamespaceString) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let uuid = collections
            .iter()
            .find(|(_, c)| &c.nss == nss)
            .map(|(uuid, _)| *uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(nss.ns()))?;
        collections.remove(&uuid);
        Ok(())
    }

    fn rename_collection_for_rollback(
        &self,
        target: &NamespaceString,
        uuid: Uuid,
    ) -> RollbackResult<()> {
        let mut collections = self.write()?;
        if let Some((holder, _)) = collections.iter().find(|(_, c)| &c.nss == target) {
            if *holder == uuid {
                return Ok(());
            }
            return Err(RollbackError::namespace_exists(target.ns()));
        }
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        collection.nss = target.clone();
        Ok(())
    }

    fn set_is_temp(&self, uuid: Uuid, temp: bool) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        collection.options.temp = temp;
        Ok(())
    }

    fn update_validator(
        &self,
        uuid: Uuid,
        validator: &Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        collection.options.validator = validator.clone();
        collection.options.validation_level = level;
        collection.options.validation_action = action;
        Ok(())
    }

    fn find_by_id(&self, uuid: Uuid, id: &Value) -> RollbackResult<Option<(RecordId, Document)>> {
        let collections = self.read()?;
        let collection = collections
            .get(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        Ok(collection
            .find_by_id(id)
            .map(|(record_id, document)| (record_id, document.clone())))
    }

    fn delete_by_id(&self, uuid: Uuid, id: &Value) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        if let Some((record_id, _)) = collection.find_by_id(id) {
            collection.records.remove(&record_id);
        }
        Ok(())
    }

    fn upsert_by_id(&self, uuid: Uuid, id: &Value, document: &Document) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        match collection.find_by_id(id).map(|(record_id, _)| record_id) {
            Some(record_id) => {
                collection.records.insert(record_id, document.clone());
            }
            None => {
                collection.insert(document.clone());
            }
        }
        Ok(())
    }

    fn scan_collection(&self, uuid: Uuid) -> RollbackResult<Vec<Document>> {
        let collections = self.read()?;
        let collection = collections
            .get(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        Ok(collection.records.values().cloned().collect())
    }

    fn capped_truncate_after(
        &self,
        uuid: Uuid,
        loc: RecordId,
        inclusive: bool,
    ) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        if !collection.capped {
            return Err(RollbackError::storage(format!(
                "{} is not capped",
                collection.nss
            )));
        }
        if self.fail_capped_truncate.load(Ordering::SeqCst)
            && collection.nss != NamespaceString::rs_oplog()
        {
            return Err(RollbackError::storage(format!(
                "injected capped truncation failure on {}",
                collection.nss
            )));
        }

        let keep = |record_id: &RecordId| {
            if inclusive {
                *record_id < loc
            } else {
                *record_id <= loc
            }
        };
        if !collection.records.keys().any(keep) {
            return Err(RollbackError::empties_capped_collection(format!(
                "truncating {} after {} would empty it",
                collection.nss, loc
            )));
        }
        collection.records.retain(|record_id, _| keep(record_id));
        Ok(())
    }

    fn truncate(&self, uuid: Uuid) -> RollbackResult<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        collection.records.clear();
        Ok(())
    }
}
