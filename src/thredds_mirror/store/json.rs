use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::Context;

use crate::core::metadata::DatasetMetadata;
use crate::store::MetadataStore;
use crate::util::errors::MirrorResult;
use crate::util::paths;

/// File-backed store: a single JSON array of metadata documents.
///
/// Every operation reads the file afresh and every write re-serialises
/// the full map through an atomic temp-write-and-rename, so there is no
/// cache to invalidate. Suitable for the volumes this worker sees (one
/// document per mirrored file); the production document database sits
/// behind the same trait.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> JsonFileStore {
        JsonFileStore { path }
    }

    fn read_all(&self) -> MirrorResult<BTreeMap<String, DatasetMetadata>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read metadata store `{}`", self.path.display())
                })
            }
        };
        let records: Vec<DatasetMetadata> = serde_json::from_slice(&raw)
            .with_context(|| {
                format!("malformed metadata store `{}`", self.path.display())
            })?;
        Ok(records.into_iter().map(|r| (r.id.clone(), r)).collect())
    }

    fn write_all(&self, records: &BTreeMap<String, DatasetMetadata>) -> MirrorResult<()> {
        if let Some(parent) = self.path.parent() {
            paths::create_dir_all(parent)?;
        }
        let documents: Vec<&DatasetMetadata> = records.values().collect();
        let raw = serde_json::to_vec_pretty(&documents)?;
        paths::write_atomic(&self.path, &raw)
    }
}

impl MetadataStore for JsonFileStore {
    fn list(&self, definition_id: &str) -> MirrorResult<Vec<DatasetMetadata>> {
        Ok(self
            .read_all()?
            .into_values()
            .filter(|r| r.definition_id == definition_id)
            .collect())
    }

    fn upsert(&self, record: &DatasetMetadata) -> MirrorResult<()> {
        let mut records = self.read_all()?;
        records.insert(record.id.clone(), record.clone());
        self.write_all(&records)
    }

    fn delete(&self, key: &str) -> MirrorResult<()> {
        let mut records = self.read_all()?;
        if records.remove(key).is_some() {
            self.write_all(&records)?;
        }
        Ok(())
    }
}
