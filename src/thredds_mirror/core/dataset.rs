//! A catalogue dataset resolved against its originating source, plus the
//! destination-URI arithmetic.

use url::Url;

use crate::core::definition::{CatalogueSource, Output};

/// Filename extensions treated as single-file archives. The archive is
/// expanded after download and the extension is dropped from the
/// destination URI.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["gz", "zip"];

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    /// Opaque catalogue-supplied id.
    pub id: String,
    /// The dataset's `urlPath` in the catalogue.
    pub url_path: String,
    /// HTTP-file-server access URL; authoritative for the transfer.
    pub file_server_url: Url,
    /// Advertised last-modified, ms since epoch UTC. Zero when the
    /// catalogue does not advertise one.
    pub last_modified: i64,
    /// Advertised size in bytes. Zero when not advertised.
    pub size: u64,
    /// The catalogue source this entry came from.
    pub source: CatalogueSource,
}

impl DatasetEntry {
    /// The last path segment of the dataset's URL path; the name used for
    /// the temporary download file.
    pub fn filename(&self) -> &str {
        self.url_path.rsplit('/').next().unwrap_or(&self.url_path)
    }

    /// The filename as published to the sink: the archive extension, if
    /// any, is dropped because the content is expanded before publishing.
    pub fn published_filename(&self) -> &str {
        strip_archive_extension(self.filename())
    }

    /// Joins the definition's destination prefix, the source's
    /// sub-directory, and the published filename into the final URI.
    pub fn dest_uri(&self, output: &Output) -> String {
        let mut uri = output.destination.clone();
        if !uri.ends_with('/') {
            uri.push('/');
        }
        if let Some(sub) = &self.source.sub_directory {
            let sub = sub.trim_matches('/');
            if !sub.is_empty() {
                uri.push_str(sub);
                uri.push('/');
            }
        }
        uri.push_str(self.published_filename());
        uri
    }
}

pub fn strip_archive_extension(filename: &str) -> &str {
    for ext in ARCHIVE_EXTENSIONS {
        if let Some(stem) = filename.strip_suffix(&format!(".{}", ext)) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    filename
}

/// Whether the filename carries a recognised single-file archive
/// extension.
pub fn has_archive_extension(filename: &str) -> bool {
    strip_archive_extension(filename) != filename
}
