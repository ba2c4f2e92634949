//! Explicit configuration for a single reconciliation run.
//!
//! All process-environment reading happens at the binary boundary; the
//! library only ever sees this record.

use std::time::Duration;

use crate::util::network;

/// Notification channel identifiers, one per audience.
#[derive(Debug, Clone)]
pub struct Channels {
    /// Operational channel for per-definition download summaries.
    pub download_complete: String,
    /// Operational channel for the end-of-run aggregate summary.
    pub aggregate: String,
    /// Administrative channel for disk-full and corrupted-file alerts.
    pub administrative: String,
}

impl Default for Channels {
    fn default() -> Channels {
        Channels {
            download_complete: "downloads".to_string(),
            aggregate: "downloads-aggregate".to_string(),
            administrative: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Log intended transfers without touching the temp dir or the sink.
    pub dry_run: bool,
    /// Cap on *successful* downloads per definition. Negative means
    /// unlimited; zero means do nothing at all.
    pub limit: i64,
    /// Restrict the run to one definition, including disabled ones.
    pub definition_id: Option<String>,
    /// Overrides the definition's filename filter. Only meaningful
    /// together with `definition_id`.
    pub files: Option<Vec<String>>,
    /// Connect and whole-request timeout for catalogue and dataset
    /// requests.
    pub http_timeout: Duration,
    pub channels: Channels,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig {
            dry_run: false,
            limit: -1,
            definition_id: None,
            files: None,
            http_timeout: network::HTTP_TIMEOUT,
            channels: Channels::default(),
        }
    }
}

impl RunConfig {
    pub fn unlimited(&self) -> bool {
        self.limit < 0
    }
}
