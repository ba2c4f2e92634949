//! The persisted metadata record, the authoritative state per mirrored
//! file. Field names follow the stored documents.

use serde::{Deserialize, Serialize};

pub const CHECKSUM_ALGORITHM: &str = "MD5";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Valid,
    Corrupted,
    Deleted,
}

impl Status {
    /// DELETED and CORRUPTED records are tombstones: they suppress any
    /// re-download until the source's advertised last-modified strictly
    /// increases.
    pub fn is_tombstone(self) -> bool {
        matches!(self, Status::Deleted | Status::Corrupted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Primary key: `definitionId + "/" + normalise(datasetId)`.
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "definitionId")]
    pub definition_id: String,
    /// The catalogue-supplied id, unnormalised.
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    /// Final location in the sink.
    #[serde(rename = "fileURI")]
    pub file_uri: String,
    /// Content hash over the exact bytes on disk, tagged with the
    /// algorithm, e.g. `MD5:b16fa142ee09acd1ddb9d06f49d0d21a`.
    pub checksum: String,
    pub status: Status,
    /// Source-advertised timestamp, ms since epoch UTC.
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    /// Wall-clock time the current content was written to the sink, ms
    /// since epoch. Legacy records may carry `lastModified` here as a
    /// sentinel for "unknown download time".
    #[serde(rename = "lastDownloaded")]
    pub last_downloaded: i64,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacktrace: Vec<String>,
    /// Scientific metadata produced by the integrity scanner. Opaque to
    /// the reconciliation engine; carried through serialisation untouched.
    #[serde(flatten)]
    pub extracted: serde_json::Map<String, serde_json::Value>,
}

/// Builds the canonical primary key for a `(definition, dataset)` pair.
pub fn unique_key(definition_id: &str, dataset_id: &str) -> String {
    format!("{}/{}", definition_id, normalise_id(dataset_id))
}

/// Replaces every character outside the store's key alphabet
/// (`[A-Za-z0-9_-]`) with `_`. Notably a dot becomes `_`; records written
/// before this rule existed keep their raw keys and are never rewritten.
pub fn normalise_id(dataset_id: &str) -> String {
    dataset_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl DatasetMetadata {
    /// True when this record's stored key differs from the canonical key
    /// for its ids, i.e. it predates key normalisation. Such records are
    /// invisible to catalogue reconciliation.
    pub fn has_legacy_key(&self) -> bool {
        self.id != unique_key(&self.definition_id, &self.dataset_id)
    }
}
