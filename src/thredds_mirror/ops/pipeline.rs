//! The per-dataset download-verify-publish pipeline.
//!
//! Control never leaves this module holding a temporary file: the working
//! file lives in a guard that removes it on every exit path, including
//! unwinds. Recoverable per-file faults are recorded in the definition
//! summary and reported as [`PipelineOutcome::Skipped`]; an `Err` means
//! the metadata store could not be updated and the whole definition must
//! stop.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::dataset::{self, DatasetEntry};
use crate::core::definition::DownloadDefinition;
use crate::core::metadata::{DatasetMetadata, Status};
use crate::notify::{self, Notifier};
use crate::ops::reconcile::DownloadOutput;
use crate::scan::IntegrityScanner;
use crate::sinks::Sink;
use crate::store::MetadataStore;
use crate::util::config::RunConfig;
use crate::util::errors::{display_causes, internal, MirrorResult};
use crate::util::network::{self, retry};
use crate::util::paths;

/// What the pipeline did for one dataset.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// New content was published and recorded; consumes limit quota.
    Downloaded(DatasetMetadata),
    /// Dry run: the transfer was only logged; consumes limit quota.
    DryRun,
    /// Nothing was published. Covers up-to-date content, capacity and
    /// integrity faults, and per-file errors already recorded in the
    /// summary.
    Skipped,
}

/// The collaborators the pipeline works against, borrowed for one
/// definition's run.
pub(crate) struct PipelineContext<'a> {
    pub definition: &'a DownloadDefinition,
    pub store: &'a dyn MetadataStore,
    pub sink: &'a dyn Sink,
    pub scanner: &'a dyn IntegrityScanner,
    pub notifier: &'a dyn Notifier,
    pub config: &'a RunConfig,
}

/// Removes the working file when dropped. Publishing may legitimately
/// consume the file first (rename into place); a missing file is fine.
struct TempGuard {
    path: PathBuf,
}

impl TempGuard {
    fn new(path: PathBuf) -> TempGuard {
        TempGuard { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Err(e) = paths::remove_file_if_exists(&self.path) {
            warn!(
                "failed to clean up temporary file `{}`: {:#}",
                self.path.display(),
                e
            );
        }
    }
}

pub(crate) fn download_and_publish(
    cx: &PipelineContext<'_>,
    entry: &DatasetEntry,
    old: Option<&DatasetMetadata>,
    output: &mut DownloadOutput,
) -> MirrorResult<PipelineOutcome> {
    let dest_uri = entry.dest_uri(&cx.definition.output);
    let source = entry.file_server_url.as_str();
    let download_dir = &cx.definition.output.download_dir;

    // Stage 1: make sure the transfer can land on disk at all.
    if let Err(e) = paths::create_dir_all(download_dir) {
        output
            .errors
            .push(format!("`{}`: {}", entry.id, display_causes(&e)));
        return Ok(PipelineOutcome::Skipped);
    }
    match fs2::available_space(download_dir) {
        Ok(free) if free < entry.size => {
            notify::disk_full(cx.notifier, &cx.config.channels, source, entry.size, free);
            output.warnings.push(format!(
                "`{}` skipped: {} bytes required but only {} free in `{}`",
                entry.id,
                entry.size,
                free,
                download_dir.display()
            ));
            return Ok(PipelineOutcome::Skipped);
        }
        Ok(_) => {}
        Err(e) => {
            output.errors.push(format!(
                "`{}`: cannot stat free space in `{}`: {}",
                entry.id,
                download_dir.display(),
                e
            ));
            return Ok(PipelineOutcome::Skipped);
        }
    }

    // Stage 2: a dry run stops before anything touches disk.
    if cx.config.dry_run {
        info!("dry run: would download {} to {}", source, dest_uri);
        return Ok(PipelineOutcome::DryRun);
    }

    // Stage 3: fetch into the guarded temporary file.
    let mut guard = TempGuard::new(download_dir.join(entry.filename()));
    if let Err(e) = fetch_source(&entry.file_server_url, guard.path(), cx.config.http_timeout) {
        output.errors.push(format!(
            "failed to download `{}` from `{}`: {}",
            entry.id,
            source,
            display_causes(&e)
        ));
        return Ok(PipelineOutcome::Skipped);
    }

    // Stage 4: expand a single-file archive and continue with the
    // expanded sibling.
    if dataset::has_archive_extension(entry.filename()) {
        match expand_archive(guard.path()) {
            Ok(expanded) => guard.set_path(expanded),
            Err(e) => {
                output.errors.push(format!(
                    "failed to expand `{}`: {}",
                    entry.id,
                    display_causes(&e)
                ));
                return Ok(PipelineOutcome::Skipped);
            }
        }
    }

    // Stage 5: integrity scan and metadata extraction.
    let tentative = match cx.scanner.extract(
        &cx.definition.id,
        &entry.id,
        &dest_uri,
        guard.path(),
        entry.last_modified,
    ) {
        Ok(tentative) => tentative,
        Err(e) => {
            output.errors.push(format!(
                "failed to scan `{}`: {}",
                entry.id,
                display_causes(&e)
            ));
            return Ok(PipelineOutcome::Skipped);
        }
    };

    // Stage 6: branch on the tentative record.
    if tentative.status == Status::Corrupted {
        let reason = tentative
            .error_message
            .clone()
            .unwrap_or_else(|| "integrity scan failed".to_string());
        record_corrupted(cx, entry, tentative, &reason, output)?;
        return Ok(PipelineOutcome::Skipped);
    }

    if let Some(old) = old {
        if old.checksum == tentative.checksum {
            // The source advertised a newer timestamp but the bytes are
            // identical: only the timestamps advance. Note that if the
            // sink object was removed out of band it stays missing until
            // the content itself changes; a DELETED record keeps its
            // status here.
            let mut updated = old.clone();
            updated.last_modified = entry.last_modified;
            updated.last_downloaded = tentative.last_downloaded;
            cx.store
                .upsert(&updated)
                .context("failed to record unchanged content")?;
            debug!(
                "content of `{}` unchanged ({}), timestamps advanced",
                entry.id, updated.checksum
            );
            return Ok(PipelineOutcome::Skipped);
        }
    }

    // Content genuinely changed: run the expensive validation before
    // letting it anywhere near the sink.
    let scan_failure = match cx.scanner.deep_scan(guard.path()) {
        Ok(failure) => failure,
        Err(e) => Some(format!("deep scan failed: {}", display_causes(&e))),
    };
    if let Some(reason) = scan_failure {
        let mut corrupted = tentative;
        corrupted.status = Status::Corrupted;
        corrupted.error_message = Some(reason.clone());
        record_corrupted(cx, entry, corrupted, &reason, output)?;
        return Ok(PipelineOutcome::Skipped);
    }

    if let Err(e) = cx.sink.publish(guard.path(), &dest_uri) {
        // The previous record, if any, stays authoritative; sink and
        // metadata remain consistent.
        output.errors.push(format!(
            "failed to publish `{}` to `{}`: {}",
            entry.id,
            dest_uri,
            display_causes(&e)
        ));
        return Ok(PipelineOutcome::Skipped);
    }

    cx.store
        .upsert(&tentative)
        .context("failed to record completed download")?;
    info!("downloaded {} to {}", source, dest_uri);
    output.successes.push(tentative.clone());
    Ok(PipelineOutcome::Downloaded(tentative))
}

/// Persists a CORRUPTED record, alerts the administrative channel, and
/// notes the warning in the summary.
fn record_corrupted(
    cx: &PipelineContext<'_>,
    entry: &DatasetEntry,
    record: DatasetMetadata,
    reason: &str,
    output: &mut DownloadOutput,
) -> MirrorResult<()> {
    cx.store
        .upsert(&record)
        .context("failed to record corrupted download")?;
    notify::corrupted_file(
        cx.notifier,
        &cx.config.channels,
        &cx.definition.id,
        &entry.id,
        reason,
    );
    output
        .warnings
        .push(format!("`{}` failed integrity checks: {}", entry.id, reason));
    Ok(())
}

/// Brings the source object into the temporary file: HTTP with the full
/// retry schedule, or a plain copy for `file://` sources.
fn fetch_source(source: &Url, dest: &Path, timeout: Duration) -> MirrorResult<()> {
    match source.scheme() {
        "http" | "https" => retry::with_retry(&format!("download of `{}`", source), || {
            network::fetch_to_file(source.as_str(), dest, network::SINGLE_TRANSFER_CAP, timeout)
        }),
        "file" => {
            let from = source
                .to_file_path()
                .map_err(|_| anyhow::format_err!("invalid file URL `{}`", source))?;
            fs::copy(&from, dest)
                .with_context(|| format!("failed to copy `{}`", from.display()))?;
            Ok(())
        }
        scheme => bail!("unsupported source URL scheme `{}`", scheme),
    }
}

/// Expands a single-file `.gz` or `.zip` archive to a sibling named after
/// the archive minus its extension, then removes the archive.
fn expand_archive(archive: &Path) -> MirrorResult<PathBuf> {
    // The path was built from a URL's last segment, so a missing or
    // non-UTF-8 filename means the pipeline itself went wrong.
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| internal(format!("archive `{}` has no filename", archive.display())))?;
    let stem = dataset::strip_archive_extension(name);
    let target = archive.with_file_name(stem);

    let result = (|| -> MirrorResult<()> {
        let file = File::open(archive)?;
        let mut out = File::create(&target)?;
        if name.ends_with(".gz") {
            let mut decoder = flate2::read::GzDecoder::new(file);
            io::copy(&mut decoder, &mut out)?;
        } else {
            let mut zip = zip::ZipArchive::new(file)?;
            if zip.len() != 1 {
                bail!("expected a single-file archive, found {} entries", zip.len());
            }
            let mut entry = zip.by_index(0)?;
            io::copy(&mut entry, &mut out)?;
        }
        Ok(())
    })()
    .with_context(|| format!("failed to expand `{}`", archive.display()));

    if let Err(e) = result {
        // Keep the invariant: neither the archive nor a half-written
        // sibling survives a failed expansion. The archive itself is
        // still owned by the caller's guard.
        let _ = paths::remove_file_if_exists(&target);
        return Err(e);
    }
    paths::remove_file(archive)?;
    Ok(target)
}
