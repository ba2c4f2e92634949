use std::time::{SystemTime, UNIX_EPOCH};

pub use self::config::{Channels, RunConfig};
pub use self::errors::{internal, MirrorResult};

pub mod config;
pub mod errors;
pub mod network;
pub mod paths;

/// Wall-clock time as milliseconds since the Unix epoch, the unit every
/// persisted timestamp uses.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
