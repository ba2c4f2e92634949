//! The reconciliation loop: converges sink and metadata store onto the
//! state advertised by a definition's catalogues.

use std::collections::HashMap;

use anyhow::Context;
use tracing::{debug, info, trace, warn};

use crate::core::dataset::DatasetEntry;
use crate::core::definition::DownloadDefinition;
use crate::core::metadata::{self, DatasetMetadata, Status};
use crate::notify::{self, Notifier, SummaryCounts};
use crate::ops::pipeline::{self, PipelineContext, PipelineOutcome};
use crate::scan::IntegrityScanner;
use crate::sinks::{self, Sink};
use crate::sources::CatalogLoader;
use crate::store::MetadataStore;
use crate::util::config::RunConfig;
use crate::util::errors::{display_causes, MirrorResult};

/// Per-definition summary: three disjoint lists. Successes are the
/// newly-written metadata records; warnings cover recoverable per-file
/// issues; errors cover unrecoverable ones.
#[derive(Debug, Default)]
pub struct DownloadOutput {
    pub definition_id: String,
    pub successes: Vec<DatasetMetadata>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl DownloadOutput {
    fn new(definition_id: &str) -> DownloadOutput {
        DownloadOutput {
            definition_id: definition_id.to_string(),
            ..DownloadOutput::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn counts(&self) -> SummaryCounts<'_> {
        SummaryCounts {
            definition_id: &self.definition_id,
            successes: self.successes.len(),
            warnings: self.warnings.len(),
            errors: self.errors.len(),
        }
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn MetadataStore,
    scanner: &'a dyn IntegrityScanner,
    notifier: &'a dyn Notifier,
    config: &'a RunConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn MetadataStore,
        scanner: &'a dyn IntegrityScanner,
        notifier: &'a dyn Notifier,
        config: &'a RunConfig,
    ) -> Reconciler<'a> {
        Reconciler {
            store,
            scanner,
            notifier,
            config,
        }
    }

    /// Runs every selected definition in order and emits the aggregate
    /// notification when anything happened. Definitions are selected by
    /// `config.definition_id` (which admits disabled definitions), or by
    /// their `enabled` flag.
    pub fn run_all(&self, definitions: &[DownloadDefinition]) -> Vec<DownloadOutput> {
        let selected: Vec<&DownloadDefinition> = match &self.config.definition_id {
            Some(id) => match definitions.iter().find(|d| &d.id == id) {
                Some(definition) => {
                    if !definition.enabled {
                        info!("running disabled definition `{}` by request", id);
                    }
                    vec![definition]
                }
                None => {
                    warn!("definition `{}` not found", id);
                    Vec::new()
                }
            },
            None => {
                let (enabled, disabled): (Vec<_>, Vec<_>) =
                    definitions.iter().partition(|d| d.enabled);
                for definition in disabled {
                    debug!("skipping disabled definition `{}`", definition.id);
                }
                enabled
            }
        };

        let outputs: Vec<DownloadOutput> =
            selected.into_iter().map(|d| self.run(d)).collect();

        let counts: Vec<SummaryCounts<'_>> = outputs
            .iter()
            .filter(|o| !o.is_empty())
            .map(DownloadOutput::counts)
            .collect();
        if !counts.is_empty() {
            notify::run_complete(self.notifier, &self.config.channels, &counts);
        }
        outputs
    }

    /// Converges one definition. Fatal faults (a metadata store that
    /// stops accepting writes) end the definition early; the summary
    /// accumulated so far is still returned and still notified.
    pub fn run(&self, definition: &DownloadDefinition) -> DownloadOutput {
        let mut output = DownloadOutput::new(&definition.id);
        info!("reconciling definition `{}`", definition.id);

        if self.config.limit == 0 {
            info!("download limit is 0, nothing to do");
            return output;
        }

        let sink = match sinks::for_output(&definition.output) {
            Ok(sink) => sink,
            Err(e) => {
                output.errors.push(format!(
                    "cannot open sink for `{}`: {}",
                    definition.id,
                    display_causes(&e)
                ));
                return self.finish(output);
            }
        };
        let filter = match definition.filter(self.config.files.as_deref()) {
            Ok(filter) => filter,
            Err(e) => {
                output
                    .errors
                    .push(format!("`{}`: {}", definition.id, display_causes(&e)));
                return self.finish(output);
            }
        };

        // One memoising loader per definition per run.
        let mut loader = CatalogLoader::new(self.config.http_timeout);
        let entries = match loader.datasets(definition, &filter) {
            Ok(entries) => entries,
            Err(e) => {
                output.errors.push(format!(
                    "failed to load catalogues for `{}`: {}",
                    definition.id,
                    display_causes(&e)
                ));
                return self.finish(output);
            }
        };
        if entries.is_empty() {
            warn!(
                "no suitable catalogue URL for definition `{}`",
                definition.id
            );
            return self.finish(output);
        }

        let existing = match self.load_existing(&definition.id) {
            Ok(existing) => existing,
            Err(e) => {
                output.errors.push(format!(
                    "cannot load metadata for `{}`: {}",
                    definition.id,
                    display_causes(&e)
                ));
                return self.finish(output);
            }
        };

        let cx = PipelineContext {
            definition,
            store: self.store,
            sink: sink.as_ref(),
            scanner: self.scanner,
            notifier: self.notifier,
            config: self.config,
        };

        let mut remaining: u64 = if self.config.unlimited() {
            u64::MAX
        } else {
            self.config.limit as u64
        };

        // The map iterates in sorted dataset-id order.
        for (dataset_id, entry) in &entries {
            if remaining == 0 {
                info!("download limit reached for `{}`", definition.id);
                break;
            }
            let key = metadata::unique_key(&definition.id, dataset_id);
            let old = existing.get(&key);

            let up_to_date =
                old.map_or(false, |o| entry.last_modified <= o.last_modified);
            let result = if up_to_date {
                self.verify_present(definition, old.unwrap(), entry, sink.as_ref(), &mut output)
                    .map(|()| PipelineOutcome::Skipped)
            } else {
                pipeline::download_and_publish(&cx, entry, old, &mut output)
            };

            match result {
                Ok(PipelineOutcome::Downloaded(_)) | Ok(PipelineOutcome::DryRun) => {
                    remaining -= 1;
                }
                Ok(PipelineOutcome::Skipped) => {}
                Err(e) => {
                    output.errors.push(format!(
                        "aborting definition `{}`: {}",
                        definition.id,
                        display_causes(&e)
                    ));
                    break;
                }
            }
        }

        self.finish(output)
    }

    fn finish(&self, output: DownloadOutput) -> DownloadOutput {
        info!(
            "definition `{}` finished: {} downloaded, {} warnings, {} errors",
            output.definition_id,
            output.successes.len(),
            output.warnings.len(),
            output.errors.len()
        );
        if !output.is_empty() {
            notify::definition_complete(self.notifier, &self.config.channels, output.counts());
        }
        output
    }

    /// One batched read of the definition's records, keyed by stored
    /// primary key. Lookups use the canonical key, so records written
    /// before key normalisation never match; they are surfaced in the
    /// logs and otherwise left alone.
    fn load_existing(
        &self,
        definition_id: &str,
    ) -> MirrorResult<HashMap<String, DatasetMetadata>> {
        let records = self
            .store
            .list(definition_id)
            .context("failed to list metadata records")?;
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if record.has_legacy_key() {
                warn!(
                    "record `{}` has a legacy primary key and will not be reconciled",
                    record.id
                );
            }
            map.insert(record.id.clone(), record);
        }
        Ok(map)
    }

    /// The catalogue says nothing changed; make sure the mirrored object
    /// is still where the record says it is. Tombstones are not
    /// re-probed: they stay until the source's last-modified strictly
    /// increases.
    fn verify_present(
        &self,
        definition: &DownloadDefinition,
        old: &DatasetMetadata,
        entry: &DatasetEntry,
        sink: &dyn Sink,
        output: &mut DownloadOutput,
    ) -> MirrorResult<()> {
        if old.status.is_tombstone() {
            trace!("`{}` is a tombstone, leaving it alone", old.id);
            return Ok(());
        }
        let dest_uri = entry.dest_uri(&definition.output);
        match sink.exists(&dest_uri) {
            Ok(true) => {
                trace!("`{}` still present", dest_uri);
                Ok(())
            }
            Ok(false) => {
                info!("`{}` vanished from the sink, marking as deleted", dest_uri);
                let mut flipped = old.clone();
                flipped.status = Status::Deleted;
                self.store
                    .upsert(&flipped)
                    .context("failed to record deletion")
            }
            Err(e) => {
                output.errors.push(format!(
                    "failed to probe `{}`: {}",
                    dest_uri,
                    display_causes(&e)
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::definition::{CatalogueSource, Output, SinkKind};
    use crate::notify::LogNotifier;
    use crate::scan::NetcdfScanner;
    use crate::store::MemoryStore;

    fn definition(catalogue_url: &str) -> DownloadDefinition {
        DownloadDefinition {
            id: "downloads/test".to_string(),
            enabled: true,
            catalogue_urls: vec![CatalogueSource {
                catalogue_url: catalogue_url.to_string(),
                sub_directory: None,
            }],
            filename_regex: None,
            files: None,
            output: Output {
                kind: SinkKind::File,
                destination: "file:///nonexistent/mirror".to_string(),
                download_dir: "/nonexistent/dl".into(),
            },
        }
    }

    #[test]
    fn limit_zero_touches_nothing() {
        let store = MemoryStore::new();
        let scanner = NetcdfScanner::new();
        let notifier = LogNotifier::new();
        let config = RunConfig {
            limit: 0,
            ..RunConfig::default()
        };
        let reconciler = Reconciler::new(&store, &scanner, &notifier, &config);
        // The catalogue URL is bogus; with limit 0 it must never be read.
        let output = reconciler.run(&definition("file:///nonexistent/catalog.xml"));
        assert!(output.is_empty());
        assert!(store.all().is_empty());
    }

    #[test]
    fn missing_catalogue_is_reported_not_fatal() {
        let store = MemoryStore::new();
        let scanner = NetcdfScanner::new();
        let notifier = LogNotifier::new();
        let config = RunConfig::default();
        let reconciler = Reconciler::new(&store, &scanner, &notifier, &config);
        let output = reconciler.run(&definition("file:///nonexistent/catalog.xml"));
        // All sources were skipped, so the definition simply had nothing
        // to do.
        assert!(output.successes.is_empty());
        assert!(output.errors.is_empty());
    }

    #[test]
    fn disabled_definitions_are_skipped_unless_requested() {
        let store = MemoryStore::new();
        let scanner = NetcdfScanner::new();
        let notifier = LogNotifier::new();
        let mut def = definition("file:///nonexistent/catalog.xml");
        def.enabled = false;

        let config = RunConfig::default();
        let reconciler = Reconciler::new(&store, &scanner, &notifier, &config);
        assert!(reconciler.run_all(std::slice::from_ref(&def)).is_empty());

        let config = RunConfig {
            definition_id: Some("downloads/test".to_string()),
            ..RunConfig::default()
        };
        let reconciler = Reconciler::new(&store, &scanner, &notifier, &config);
        assert_eq!(reconciler.run_all(std::slice::from_ref(&def)).len(), 1);
    }

    #[test]
    fn unknown_definition_id_selects_nothing() {
        let store = MemoryStore::new();
        let scanner = NetcdfScanner::new();
        let notifier = LogNotifier::new();
        let config = RunConfig {
            definition_id: Some("downloads/absent".to_string()),
            ..RunConfig::default()
        };
        let reconciler = Reconciler::new(&store, &scanner, &notifier, &config);
        let defs = vec![definition("file:///nonexistent/catalog.xml")];
        assert!(reconciler.run_all(&defs).is_empty());
    }
}
