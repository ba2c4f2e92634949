//! The download definition: the unit of reconciliation.
//!
//! Definitions arrive as JSON documents (see the repository README for the
//! shape); field names follow the stored documents, not Rust convention.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::util::errors::MirrorResult;

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadDefinition {
    #[serde(rename = "_id")]
    pub id: String,
    pub enabled: bool,
    #[serde(rename = "catalogueUrls")]
    pub catalogue_urls: Vec<CatalogueSource>,
    /// Regular expression matched against the whole of the last path
    /// segment. Ignored when `files` is present.
    #[serde(rename = "filenameRegex", default)]
    pub filename_regex: Option<String>,
    /// Explicit set of filenames to admit. Takes precedence over
    /// `filename_regex`.
    #[serde(default)]
    pub files: Option<Vec<String>>,
    pub output: Output,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogueSource {
    #[serde(rename = "catalogueUrl")]
    pub catalogue_url: String,
    /// Optional path component inserted between the destination prefix and
    /// the filename.
    #[serde(rename = "subDirectory", default)]
    pub sub_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    #[serde(rename = "type")]
    pub kind: SinkKind,
    /// Destination URI prefix (`s3://bucket/prefix` or
    /// `file:///absolute/prefix`). A trailing `/` is enforced when joining.
    pub destination: String,
    #[serde(rename = "downloadDir")]
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SinkKind {
    S3,
    #[serde(rename = "FILE")]
    File,
}

/// The filename selection rule applied to every catalogue dataset.
#[derive(Debug)]
pub enum FilenameFilter {
    All,
    Set(HashSet<String>),
    Pattern(Regex),
}

impl FilenameFilter {
    pub fn admits(&self, filename: &str) -> bool {
        match self {
            FilenameFilter::All => true,
            FilenameFilter::Set(names) => names.contains(filename),
            FilenameFilter::Pattern(re) => re.is_match(filename),
        }
    }

    fn from_pattern(pattern: &str) -> MirrorResult<FilenameFilter> {
        // Anchored so the expression must cover the whole filename.
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .with_context(|| format!("invalid filename regex `{}`", pattern))?;
        Ok(FilenameFilter::Pattern(re))
    }
}

impl DownloadDefinition {
    /// The definition's own selection rule, or the per-run `files`
    /// override when one was supplied.
    pub fn filter(&self, override_files: Option<&[String]>) -> MirrorResult<FilenameFilter> {
        if let Some(files) = override_files {
            return Ok(FilenameFilter::Set(files.iter().cloned().collect()));
        }
        if let Some(files) = &self.files {
            return Ok(FilenameFilter::Set(files.iter().cloned().collect()));
        }
        if let Some(pattern) = &self.filename_regex {
            return FilenameFilter::from_pattern(pattern);
        }
        Ok(FilenameFilter::All)
    }
}

pub fn parse_definitions(json: &str) -> MirrorResult<Vec<DownloadDefinition>> {
    let definitions: Vec<DownloadDefinition> =
        serde_json::from_str(json).context("failed to parse download definitions")?;
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(json: &str) -> DownloadDefinition {
        serde_json::from_str(json).unwrap()
    }

    const BASE: &str = r#"{
        "_id": "downloads/gbr4_v2",
        "enabled": true,
        "catalogueUrls": [
            {"catalogueUrl": "https://thredds.example.org/catalog.xml", "subDirectory": "gbr4"}
        ],
        "filenameRegex": "gbr4_simple_[0-9-]+\\.nc",
        "output": {
            "type": "S3",
            "destination": "s3://mirror-bucket/derived",
            "downloadDir": "/tmp/downloads"
        }
    }"#;

    #[test]
    fn parses_stored_document_shape() {
        let def = definition(BASE);
        assert_eq!(def.id, "downloads/gbr4_v2");
        assert!(def.enabled);
        assert_eq!(def.catalogue_urls.len(), 1);
        assert_eq!(def.catalogue_urls[0].sub_directory.as_deref(), Some("gbr4"));
        assert_eq!(def.output.kind, SinkKind::S3);
    }

    #[test]
    fn regex_filter_matches_whole_filename() {
        let def = definition(BASE);
        let filter = def.filter(None).unwrap();
        assert!(filter.admits("gbr4_simple_2018-10.nc"));
        assert!(!filter.admits("gbr4_simple_2018-10.nc.md5"));
        assert!(!filter.admits("prefix_gbr4_simple_2018-10.nc"));
    }

    #[test]
    fn explicit_files_take_precedence_over_regex() {
        let mut def = definition(BASE);
        def.files = Some(vec!["exact.nc".to_string()]);
        let filter = def.filter(None).unwrap();
        assert!(filter.admits("exact.nc"));
        assert!(!filter.admits("gbr4_simple_2018-10.nc"));
    }

    #[test]
    fn override_files_win_over_definition_filter() {
        let def = definition(BASE);
        let only = vec!["gbr4_simple_2019-01.nc".to_string()];
        let filter = def.filter(Some(&only)).unwrap();
        assert!(filter.admits("gbr4_simple_2019-01.nc"));
        assert!(!filter.admits("gbr4_simple_2018-10.nc"));
    }

    #[test]
    fn no_rule_admits_everything() {
        let mut def = definition(BASE);
        def.filename_regex = None;
        let filter = def.filter(None).unwrap();
        assert!(filter.admits("anything.bin"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut def = definition(BASE);
        def.filename_regex = Some("(unclosed".to_string());
        assert!(def.filter(None).is_err());
    }
}
