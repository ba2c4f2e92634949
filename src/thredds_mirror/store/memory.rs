use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::core::metadata::DatasetMetadata;
use crate::store::MetadataStore;
use crate::util::errors::MirrorResult;

/// In-memory store. Used by tests and available to callers that want a
/// throwaway index (e.g. exploratory dry runs).
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<BTreeMap<String, DatasetMetadata>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Snapshot of every record, keyed by primary key.
    pub fn all(&self) -> BTreeMap<String, DatasetMetadata> {
        self.records.borrow().clone()
    }

    pub fn insert(&self, record: DatasetMetadata) {
        self.records.borrow_mut().insert(record.id.clone(), record);
    }
}

impl MetadataStore for MemoryStore {
    fn list(&self, definition_id: &str) -> MirrorResult<Vec<DatasetMetadata>> {
        Ok(self
            .records
            .borrow()
            .values()
            .filter(|r| r.definition_id == definition_id)
            .cloned()
            .collect())
    }

    fn upsert(&self, record: &DatasetMetadata) -> MirrorResult<()> {
        self.insert(record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> MirrorResult<()> {
        self.records.borrow_mut().remove(key);
        Ok(())
    }
}
