//! Retry driver for spurious transport failures.
//!
//! The schedule is owned here rather than threaded through the transfer
//! code: up to [`MAX_ATTEMPTS`] attempts, with the wait before attempt `k`
//! (k ≥ 2) doubling from ten seconds. The final failure surfaces the last
//! error unchanged.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::util::errors::MirrorResult;

pub const MAX_ATTEMPTS: u64 = 8;

const INITIAL_BACKOFF_SECS: u64 = 10;

/// The wait inserted before attempt `attempt`, or `None` when no such
/// attempt is allowed. Attempt numbering starts at 1, which never waits.
pub fn backoff_before(attempt: u64) -> Option<Duration> {
    if !(2..=MAX_ATTEMPTS).contains(&attempt) {
        return None;
    }
    Some(Duration::from_secs(INITIAL_BACKOFF_SECS << (attempt - 2)))
}

/// Runs `op` until it succeeds or the schedule is exhausted.
pub fn with_retry<T>(what: &str, op: impl FnMut() -> MirrorResult<T>) -> MirrorResult<T> {
    with_retry_sleeper(what, op, thread::sleep)
}

fn with_retry_sleeper<T>(
    what: &str,
    mut op: impl FnMut() -> MirrorResult<T>,
    mut sleep: impl FnMut(Duration),
) -> MirrorResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => match backoff_before(attempt + 1) {
                Some(delay) => {
                    warn!(
                        "{} failed on attempt {} of {}, retrying in {}s: {:#}",
                        what,
                        attempt,
                        MAX_ATTEMPTS,
                        delay.as_secs(),
                        e
                    );
                    sleep(delay);
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}
