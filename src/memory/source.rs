//! In-memory sync source

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use uuid::Uuid;

use super::catalog::MemoryCatalog;
use super::oplog::MemoryOplog;
use crate::document::Document;
use crate::oplog::NamespaceString;
use crate::rollback::errors::{RollbackError, RollbackErrorKind, RollbackResult};
use crate::rollback::interfaces::{Catalog, OplogInterface, RollbackSource};

/// A sync source backed by an in-memory catalog and oplog.
#[derive(Debug)]
pub struct MemoryRollbackSource {
    host: String,
    rollback_id: AtomicI32,
    oplog: MemoryOplog,
    catalog: Arc<MemoryCatalog>,
    views: RwLock<Vec<Uuid>>,
    fail_find_with: RwLock<Option<RollbackErrorKind>>,
    finds: AtomicUsize,
    bump_rollback_id_after_finds: RwLock<Option<usize>>,
}

impl MemoryRollbackSource {
    pub fn new(host: &str, oplog: MemoryOplog, catalog: Arc<MemoryCatalog>) -> Self {
        Self {
            host: host.to_string(),
            rollback_id: AtomicI32::new(0),
            oplog,
            catalog,
            views: RwLock::new(Vec::new()),
            fail_find_with: RwLock::new(None),
            finds: AtomicUsize::new(0),
            bump_rollback_id_after_finds: RwLock::new(None),
        }
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    pub fn set_rollback_id(&self, rbid: i32) {
        self.rollback_id.store(rbid, Ordering::SeqCst);
    }

    /// Report `uuid` as a view: finds on it fail with
    /// `CommandNotSupportedOnView`.
    pub fn add_view(&self, uuid: Uuid) {
        if let Ok(mut views) = self.views.write() {
            views.push(uuid);
        }
    }

    /// Make every document fetch fail with `kind`.
    pub fn set_fail_find_with(&self, kind: Option<RollbackErrorKind>) {
        if let Ok(mut fail) = self.fail_find_with.write() {
            *fail = kind;
        }
    }

    /// Simulate the source rolling back itself once `finds` documents
    /// have been fetched.
    pub fn bump_rollback_id_after_finds(&self, finds: usize) {
        if let Ok(mut bump) = self.bump_rollback_id_after_finds.write() {
            *bump = Some(finds);
        }
    }

    /// Number of documents fetched so far.
    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }
}

impl RollbackSource for MemoryRollbackSource {
    fn source(&self) -> String {
        self.host.clone()
    }

    fn rollback_id(&self) -> RollbackResult<i32> {
        Ok(self.rollback_id.load(Ordering::SeqCst))
    }

    fn last_operation(&self) -> RollbackResult<Document> {
        Ok(self.oplog.top())
    }

    fn oplog(&self) -> &dyn OplogInterface {
        &self.oplog
    }

    fn find_one_by_uuid(
        &self,
        _db: &str,
        uuid: Uuid,
        filter: &Document,
    ) -> RollbackResult<(Document, NamespaceString)> {
        let finds = self.finds.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(Some(after)) = self.bump_rollback_id_after_finds.read().map(|b| *b) {
            if finds >= after {
                self.rollback_id.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut bump) = self.bump_rollback_id_after_finds.write() {
                    *bump = None;
                }
            }
        }

        if let Ok(Some(kind)) = self.fail_find_with.read().map(|f| *f) {
            return Err(RollbackError::new(kind, "injected find failure"));
        }
        if self
            .views
            .read()
            .map(|views| views.contains(&uuid))
            .unwrap_or_default()
        {
            return Err(RollbackError::command_not_supported_on_view(uuid.to_string()));
        }

        let nss = self
            .catalog
            .lookup_nss_by_uuid(uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        let id = filter.get("_id").cloned().unwrap_or(Value::Null);
        let document = self
            .catalog
            .find_by_id(uuid, &id)?
            .map(|(_, document)| document)
            .unwrap_or_default();
        Ok((document, nss))
    }

    fn collection_info_by_uuid(&self, _db: &str, uuid: Uuid) -> RollbackResult<Document> {
        let nss = self
            .catalog
            .lookup_nss_by_uuid(uuid)
            .ok_or_else(|| RollbackError::namespace_not_found(uuid.to_string()))?;
        let options = self
            .catalog
            .options(uuid)
            .map(|options| options.to_document())
            .unwrap_or_default();
        let info = json!({
            "name": nss.coll(),
            "type": "collection",
            "options": options,
            "info": {"readOnly": false, "uuid": uuid.to_string()},
        });
        Ok(info.as_object().cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::id_query;
    use crate::memory::catalog::CollectionState;

    fn source_with_collection() -> (MemoryRollbackSource, Uuid) {
        let catalog = Arc::new(MemoryCatalog::new());
        let uuid = Uuid::new_v4();
        catalog
            .create_collection(CollectionState {
                ns: NamespaceString::new("test.c"),
                uuid,
                documents: vec![json!({"_id": 1, "a": 1}).as_object().unwrap().clone()],
                ..CollectionState::default()
            })
            .unwrap();
        (
            MemoryRollbackSource::new("remote:27017", MemoryOplog::new("remote"), catalog),
            uuid,
        )
    }

    #[test]
    fn test_find_missing_document_is_empty() {
        let (source, uuid) = source_with_collection();
        let (found, nss) = source.find_one_by_uuid("test", uuid, &id_query(&json!(1))).unwrap();
        assert_eq!(found.get("a"), Some(&json!(1)));
        assert_eq!(nss, NamespaceString::new("test.c"));

        let (missing, _) = source.find_one_by_uuid("test", uuid, &id_query(&json!(2))).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_unknown_collection_is_namespace_not_found() {
        let (source, _) = source_with_collection();
        let err = source
            .find_one_by_uuid("test", Uuid::new_v4(), &id_query(&json!(1)))
            .unwrap_err();
        assert_eq!(err.kind, RollbackErrorKind::NamespaceNotFound);
    }

    #[test]
    fn test_rollback_id_bump_after_finds() {
        let (source, uuid) = source_with_collection();
        source.bump_rollback_id_after_finds(2);
        source.find_one_by_uuid("test", uuid, &id_query(&json!(1))).unwrap();
        assert_eq!(source.rollback_id().unwrap(), 0);
        source.find_one_by_uuid("test", uuid, &id_query(&json!(1))).unwrap();
        assert_eq!(source.rollback_id().unwrap(), 1);
    }
}
