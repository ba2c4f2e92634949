//! Integrity scanning and scientific-metadata extraction.
//!
//! The reconciliation engine never parses dataset payloads itself; it
//! depends on this capability and branches only on the result.

use std::path::Path;

use crate::core::metadata::DatasetMetadata;
use crate::util::errors::MirrorResult;

pub use self::netcdf::NetcdfScanner;

pub mod netcdf;

pub trait IntegrityScanner {
    /// Inspects a freshly downloaded file and produces the tentative
    /// metadata record: `status` VALID when the file is a well-formed
    /// dataset, CORRUPTED otherwise (with `error_message` populated), and
    /// in either case a content hash computed over the exact bytes on
    /// disk. `last_downloaded` is set to the scan time.
    ///
    /// Errors are reserved for environmental failures (unreadable file);
    /// a malformed dataset is a CORRUPTED record, not an error.
    fn extract(
        &self,
        definition_id: &str,
        dataset_id: &str,
        dest_uri: &str,
        local_file: &Path,
        src_last_modified: i64,
    ) -> MirrorResult<DatasetMetadata>;

    /// Stricter validation pass, used only when content has actually
    /// changed. Streams the file, so it is safe on very large inputs.
    /// Returns a failure description, or `None` when the file passes.
    fn deep_scan(&self, local_file: &Path) -> MirrorResult<Option<String>>;
}
