//! Persistence of dataset metadata records.
//!
//! The reconciliation loop reads all of a definition's records once at
//! the start of a run and writes straight through after that; any
//! implementation must make writes visible to subsequent reads.

use crate::core::metadata::DatasetMetadata;
use crate::util::errors::MirrorResult;

pub use self::json::JsonFileStore;
pub use self::memory::MemoryStore;

pub mod json;
pub mod memory;

pub trait MetadataStore {
    /// All records belonging to `definition_id`, in unspecified order.
    fn list(&self, definition_id: &str) -> MirrorResult<Vec<DatasetMetadata>>;

    /// Inserts or replaces the record with `record.id` as the key.
    fn upsert(&self, record: &DatasetMetadata) -> MirrorResult<()>;

    /// Removes the record with the given primary key, if present.
    fn delete(&self, key: &str) -> MirrorResult<()>;
}
