//! Blocking HTTP transport on top of libcurl.
//!
//! Every request gets a fresh [`Easy`] handle configured the same way:
//! five-minute connect and whole-request timeouts, redirects followed, and
//! TLS restricted to 1.2/1.3 with peer verification disabled because the
//! institutional THREDDS servers this worker mirrors from routinely present
//! self-signed certificates. Dropping the handle aborts any in-flight
//! request and frees the connection.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use curl::easy::{Easy, SslVersion};
use tracing::debug;

use crate::util::errors::{HttpNotSuccessful, MirrorResult, TransferTooLarge};

pub mod retry;

/// Default connect, request-lease, and socket timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Hard cap on a single downloaded object. Exceeding it aborts the
/// transfer; it bounds both disk risk and the damage a misbehaving
/// catalogue entry can do.
pub const SINGLE_TRANSFER_CAP: u64 = 100 * 1024 * 1024 * 1024;

fn http_handle(url: &str, timeout: Duration) -> MirrorResult<Easy> {
    let mut handle = Easy::new();
    handle.url(url)?;
    handle.get(true)?;
    handle.follow_location(true)?;
    handle.connect_timeout(timeout)?;
    handle.timeout(timeout)?;
    handle.low_speed_time(timeout)?;
    handle.low_speed_limit(1)?;
    handle.ssl_min_max_version(SslVersion::Tlsv12, SslVersion::Tlsv13)?;
    handle.ssl_verify_peer(false)?;
    handle.ssl_verify_host(false)?;
    handle.useragent(&format!(
        "thredds-mirror/{}",
        env!("CARGO_PKG_VERSION")
    ))?;
    Ok(handle)
}

fn check_response(handle: &mut Easy, url: &str) -> MirrorResult<()> {
    let code = handle.response_code()?;
    if !(200..300).contains(&code) {
        let effective = handle.effective_url()?.unwrap_or(url).to_string();
        return Err(HttpNotSuccessful {
            code,
            url: effective,
        }
        .into());
    }
    Ok(())
}

/// Performs a GET and buffers the whole body in memory. Only suitable for
/// small documents such as catalogue XML.
pub fn fetch_to_memory(url: &str, timeout: Duration) -> MirrorResult<Vec<u8>> {
    let mut handle = http_handle(url, timeout)?;
    let mut body = Vec::new();
    {
        let mut transfer = handle.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer
            .perform()
            .with_context(|| format!("failed to fetch `{}`", url))?;
    }
    check_response(&mut handle, url)?;
    debug!("fetched {} bytes from {}", body.len(), url);
    Ok(body)
}

/// Performs a GET streamed straight to `dest` in libcurl-sized buffers.
///
/// A non-2xx status fails the attempt, as does growing past `cap` bytes;
/// in the latter case the transfer is aborted from the write callback so
/// the disk never holds more than `cap` bytes plus one buffer.
pub fn fetch_to_file(url: &str, dest: &Path, cap: u64, timeout: Duration) -> MirrorResult<()> {
    let mut handle = http_handle(url, timeout)?;
    let mut file = File::create(dest)
        .with_context(|| format!("failed to create `{}`", dest.display()))?;
    let mut written: u64 = 0;
    let mut inner: Option<anyhow::Error> = None;
    let result = {
        let mut transfer = handle.transfer();
        transfer.write_function(|data| {
            written += data.len() as u64;
            if written > cap {
                inner = Some(
                    TransferTooLarge {
                        url: url.to_string(),
                        cap,
                    }
                    .into(),
                );
                return Ok(0);
            }
            match file.write_all(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    inner = Some(
                        anyhow::Error::new(e)
                            .context(format!("failed to write `{}`", dest.display())),
                    );
                    Ok(0)
                }
            }
        })?;
        transfer.perform()
    };
    if let Some(e) = inner {
        return Err(e);
    }
    result.with_context(|| format!("failed to fetch `{}`", url))?;
    check_response(&mut handle, url)?;
    file.flush()?;
    debug!("streamed {} bytes from {} to {}", written, url, dest.display());
    Ok(())
}
