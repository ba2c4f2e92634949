//! Outbound notifications.
//!
//! Four kinds, three channels: capacity and integrity alerts go to the
//! administrative channel; per-definition and end-of-run summaries go to
//! the operational channels. Sends are fire-and-forget — a notifier
//! failure is logged and never fails a download.

use bytesize::ByteSize;
use tracing::warn;

use crate::util::config::Channels;
use crate::util::errors::MirrorResult;

pub use self::log::LogNotifier;

pub mod log;

pub trait Notifier {
    fn publish(&self, channel: &str, subject: &str, message: &str) -> MirrorResult<()>;
}

/// Per-definition counts carried by the summary notifications.
#[derive(Debug, Clone, Copy)]
pub struct SummaryCounts<'a> {
    pub definition_id: &'a str,
    pub successes: usize,
    pub warnings: usize,
    pub errors: usize,
}

fn send(notifier: &dyn Notifier, channel: &str, subject: &str, message: &str) {
    if let Err(e) = notifier.publish(channel, subject, message) {
        warn!("dropping notification `{}` on `{}`: {:#}", subject, channel, e);
    }
}

pub fn disk_full(
    notifier: &dyn Notifier,
    channels: &Channels,
    source_uri: &str,
    required: u64,
    free: u64,
) {
    send(
        notifier,
        &channels.administrative,
        "Disk full",
        &format!(
            "Not enough space to download `{}`: requires {}, {} free",
            source_uri,
            ByteSize(required),
            ByteSize(free)
        ),
    );
}

pub fn corrupted_file(
    notifier: &dyn Notifier,
    channels: &Channels,
    definition_id: &str,
    dataset_id: &str,
    error: &str,
) {
    send(
        notifier,
        &channels.administrative,
        "Corrupted download",
        &format!(
            "Dataset `{}` of definition `{}` failed integrity checks: {}",
            dataset_id, definition_id, error
        ),
    );
}

pub fn definition_complete(notifier: &dyn Notifier, channels: &Channels, counts: SummaryCounts<'_>) {
    send(
        notifier,
        &channels.download_complete,
        "Definition download complete",
        &format!(
            "Definition `{}`: {} downloaded, {} warnings, {} errors",
            counts.definition_id, counts.successes, counts.warnings, counts.errors
        ),
    );
}

pub fn run_complete(notifier: &dyn Notifier, channels: &Channels, counts: &[SummaryCounts<'_>]) {
    let lines: Vec<String> = counts
        .iter()
        .map(|c| {
            format!(
                "{}: {} downloaded, {} warnings, {} errors",
                c.definition_id, c.successes, c.warnings, c.errors
            )
        })
        .collect();
    send(
        notifier,
        &channels.aggregate,
        "Download run complete",
        &lines.join("\n"),
    );
}
