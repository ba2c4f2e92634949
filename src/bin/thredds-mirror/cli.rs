//! Argument and environment handling. This is the only place process
//! environment is read; everything downstream works from the resolved
//! [`RunConfig`].

use std::env;
use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

use thredds_mirror::util::config::{Channels, RunConfig};

#[derive(Debug, Parser)]
#[command(
    name = "thredds-mirror",
    version,
    about = "Mirror datasets from THREDDS catalogues into an object store"
)]
pub struct Cli {
    /// JSON file holding the download definitions.
    #[arg(long, value_name = "PATH")]
    pub definitions: Option<PathBuf>,

    /// JSON file backing the metadata store.
    #[arg(long, value_name = "PATH")]
    pub metadata: Option<PathBuf>,

    /// Log intended transfers without downloading or publishing.
    #[arg(long)]
    pub dry_run: bool,

    /// Cap on successful downloads per definition; negative means
    /// unlimited, zero means do nothing.
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub limit: Option<i64>,

    /// Run a single definition, even a disabled one.
    #[arg(long, value_name = "ID")]
    pub definition_id: Option<String>,

    /// Comma-separated filenames overriding the definition's filter.
    /// Only meaningful together with --definition-id.
    #[arg(long, value_name = "NAMES")]
    pub files: Option<String>,
}

#[derive(Debug)]
pub struct Settings {
    pub config: RunConfig,
    pub definitions_path: PathBuf,
    pub metadata_path: PathBuf,
}

pub fn resolve(cli: Cli) -> Settings {
    let dry_run = cli.dry_run || env_dry_run().unwrap_or(false);
    let limit = cli.limit.or_else(env_limit).unwrap_or(-1);
    let definition_id = cli
        .definition_id
        .or_else(|| env::var("DEFINITION_ID").ok())
        .filter(|id| !id.is_empty());

    let files_raw = cli.files.or_else(|| env::var("FILES").ok());
    let files = match (&definition_id, files_raw) {
        (Some(_), Some(raw)) => split_files(&raw),
        (None, Some(_)) => {
            warn!("a file list was supplied without a definition id; ignoring it");
            None
        }
        _ => None,
    };

    let channels = Channels {
        download_complete: env_or(
            "NOTIFY_DOWNLOAD_CHANNEL",
            &Channels::default().download_complete,
        ),
        aggregate: env_or("NOTIFY_AGGREGATE_CHANNEL", &Channels::default().aggregate),
        administrative: env_or(
            "NOTIFY_ADMIN_CHANNEL",
            &Channels::default().administrative,
        ),
    };

    Settings {
        config: RunConfig {
            dry_run,
            limit,
            definition_id,
            files,
            channels,
            ..RunConfig::default()
        },
        definitions_path: cli
            .definitions
            .or_else(|| env::var("DEFINITIONS_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("definitions.json")),
        metadata_path: cli
            .metadata
            .or_else(|| env::var("METADATA_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("metadata.json")),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_dry_run() -> Option<bool> {
    env::var("DRY_RUN").ok().map(|raw| parse_dry_run(&raw))
}

fn env_limit() -> Option<i64> {
    let raw = env::var("LIMIT").ok()?;
    match raw.trim().parse() {
        Ok(limit) => Some(limit),
        Err(_) => {
            warn!("invalid LIMIT value `{}`, using the default", raw);
            None
        }
    }
}

/// An unparseable value defaults to a dry run: downloading nothing is
/// recoverable, flooding the mirror is not.
fn parse_dry_run(raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "false" | "0" | "no" => false,
        "true" | "1" | "yes" => true,
        other => {
            warn!("invalid DRY_RUN value `{}`, forcing a dry run", other);
            true
        }
    }
}

fn split_files(raw: &str) -> Option<Vec<String>> {
    let names: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_dry_run_values_force_a_dry_run() {
        assert!(!parse_dry_run("false"));
        assert!(!parse_dry_run("0"));
        assert!(parse_dry_run("true"));
        assert!(parse_dry_run("TRUE"));
        assert!(parse_dry_run("maybe"));
        assert!(parse_dry_run(""));
    }

    #[test]
    fn file_lists_are_split_and_trimmed() {
        assert_eq!(
            split_files("a.nc, b.nc ,,c.nc"),
            Some(vec![
                "a.nc".to_string(),
                "b.nc".to_string(),
                "c.nc".to_string()
            ])
        );
        assert_eq!(split_files(" , "), None);
    }
}
