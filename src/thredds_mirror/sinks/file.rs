use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::debug;
use url::Url;

use crate::sinks::Sink;
use crate::util::errors::MirrorResult;
use crate::util::paths;

/// Local-filesystem sink. Publishing is a rename, which is atomic when
/// the temp directory shares a filesystem with the destination; when it
/// does not, the rename degrades to copy-then-delete.
#[derive(Debug, Default)]
pub struct FileSink;

impl FileSink {
    pub fn new() -> FileSink {
        FileSink
    }
}

fn dest_path(dest_uri: &str) -> MirrorResult<PathBuf> {
    let url = Url::parse(dest_uri)
        .with_context(|| format!("invalid destination URI `{}`", dest_uri))?;
    if url.scheme() != "file" {
        bail!("expected a file:// destination, got `{}`", dest_uri);
    }
    url.to_file_path()
        .map_err(|_| anyhow::format_err!("destination `{}` is not a local path", dest_uri))
}

impl Sink for FileSink {
    fn publish(&self, temp: &Path, dest_uri: &str) -> MirrorResult<()> {
        let dest = dest_path(dest_uri)?;
        if let Some(parent) = dest.parent() {
            paths::create_dir_all(parent)?;
        }
        paths::rename_or_copy(temp, &dest)?;
        debug!("published {} to {}", temp.display(), dest.display());
        Ok(())
    }

    fn exists(&self, dest_uri: &str) -> MirrorResult<bool> {
        Ok(dest_path(dest_uri)?.is_file())
    }

    fn remove(&self, dest_uri: &str) -> MirrorResult<()> {
        paths::remove_file_if_exists(&dest_path(dest_uri)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn publish_creates_parents_and_moves_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("dl").join("a.nc");
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, b"CDF\x01data").unwrap();
        let dest = dir.path().join("mirror").join("sub").join("a.nc");
        let dest_uri = Url::from_file_path(&dest).unwrap().to_string();

        let sink = FileSink::new();
        assert!(!sink.exists(&dest_uri).unwrap());
        sink.publish(&temp, &dest_uri).unwrap();
        assert!(!temp.exists());
        assert!(sink.exists(&dest_uri).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"CDF\x01data");

        sink.remove(&dest_uri).unwrap();
        assert!(!sink.exists(&dest_uri).unwrap());
        // Removing an absent object is not an error.
        sink.remove(&dest_uri).unwrap();
    }

    #[test]
    fn non_file_uri_is_rejected() {
        let sink = FileSink::new();
        assert!(sink.exists("s3://bucket/key").is_err());
    }
}
