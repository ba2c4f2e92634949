use tracing::info;

use crate::notify::Notifier;
use crate::util::errors::MirrorResult;

/// Notifier that writes structured log lines. The production messaging
/// glue (an SNS publisher in the original deployment) implements the same
/// trait outside this crate.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> LogNotifier {
        LogNotifier
    }
}

impl Notifier for LogNotifier {
    fn publish(&self, channel: &str, subject: &str, message: &str) -> MirrorResult<()> {
        info!(target: "notification", channel, subject, "{}", message);
        Ok(())
    }
}
