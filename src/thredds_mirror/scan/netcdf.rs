//! The shipped scanner: NetCDF signature checks plus a streaming MD5.
//!
//! This is intentionally shallow. It recognises the container format and
//! hashes the bytes; a full structural parse belongs to the scientific
//! tooling downstream of the mirror, not to the mirroring engine.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use md5::{Digest, Md5};
use serde_json::json;

use crate::core::metadata::{self, DatasetMetadata, Status, CHECKSUM_ALGORITHM};
use crate::scan::IntegrityScanner;
use crate::util::errors::MirrorResult;
use crate::util::now_millis;

const BUFFER_SIZE: usize = 64 * 1024;

const CDF_MAGIC_V1: &[u8] = b"CDF\x01";
const CDF_MAGIC_V2: &[u8] = b"CDF\x02";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

#[derive(Debug, Default)]
pub struct NetcdfScanner;

impl NetcdfScanner {
    pub fn new() -> NetcdfScanner {
        NetcdfScanner
    }
}

/// The container format identified from a file's leading bytes.
fn identify(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(CDF_MAGIC_V1) || header.starts_with(CDF_MAGIC_V2) {
        Some("netcdf-classic")
    } else if header.starts_with(HDF5_MAGIC) {
        Some("hdf5")
    } else {
        None
    }
}

/// Streams the whole file through MD5, returning the tagged digest, the
/// byte count, and the identified format (if any).
fn hash_and_identify(path: &Path) -> MirrorResult<(String, u64, Option<&'static str>)> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; BUFFER_SIZE];
    let mut total: u64 = 0;
    let mut format = None;
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        if n == 0 {
            break;
        }
        if total == 0 {
            format = identify(&buf[..n]);
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let checksum = format!("{}:{}", CHECKSUM_ALGORITHM, hex::encode(hasher.finalize()));
    Ok((checksum, total, format))
}

impl IntegrityScanner for NetcdfScanner {
    fn extract(
        &self,
        definition_id: &str,
        dataset_id: &str,
        dest_uri: &str,
        local_file: &Path,
        src_last_modified: i64,
    ) -> MirrorResult<DatasetMetadata> {
        let (checksum, size, format) = hash_and_identify(local_file)?;

        let mut extracted = serde_json::Map::new();
        let (status, error_message) = match format {
            Some(format) if size > 0 => {
                extracted.insert("format".to_string(), json!(format));
                extracted.insert("sizeBytes".to_string(), json!(size));
                (Status::Valid, None)
            }
            _ => (
                Status::Corrupted,
                Some(format!(
                    "`{}` is not a recognised NetCDF file ({} bytes)",
                    local_file.display(),
                    size
                )),
            ),
        };

        Ok(DatasetMetadata {
            id: metadata::unique_key(definition_id, dataset_id),
            definition_id: definition_id.to_string(),
            dataset_id: dataset_id.to_string(),
            file_uri: dest_uri.to_string(),
            checksum,
            status,
            last_modified: src_last_modified,
            last_downloaded: now_millis(),
            error_message,
            stacktrace: Vec::new(),
            extracted,
        })
    }

    fn deep_scan(&self, local_file: &Path) -> MirrorResult<Option<String>> {
        // Re-reads end to end: catches truncated transfers and media
        // errors that the header check cannot. A structural parse is out
        // of scope here.
        match hash_and_identify(local_file) {
            Ok((_, 0, _)) => Ok(Some("file is empty".to_string())),
            Ok((_, _, None)) => Ok(Some("unrecognised dataset container".to_string())),
            Ok(_) => Ok(None),
            Err(e) => Ok(Some(format!("unreadable during deep scan: {:#}", e))),
        }
    }
}
