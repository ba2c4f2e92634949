use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::Context;

use crate::util::errors::MirrorResult;

pub fn create_dir_all(p: &Path) -> MirrorResult<()> {
    fs::create_dir_all(p)
        .with_context(|| format!("failed to create directory `{}`", p.display()))?;
    Ok(())
}

pub fn remove_file(p: &Path) -> MirrorResult<()> {
    fs::remove_file(p).with_context(|| format!("failed to remove file `{}`", p.display()))?;
    Ok(())
}

/// Removes a file that may already be gone, e.g. a temporary that was
/// consumed by a rename.
pub fn remove_file_if_exists(p: &Path) -> MirrorResult<()> {
    match fs::remove_file(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove file `{}`", p.display()))
        }
    }
}

/// Moves `from` to `to`, falling back to copy-then-delete when the rename
/// crosses a filesystem boundary.
pub fn rename_or_copy(from: &Path, to: &Path) -> MirrorResult<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| {
        format!("failed to copy `{}` to `{}`", from.display(), to.display())
    })?;
    remove_file(from)
}

/// Writes `contents` to `path` atomically: a sibling temporary file is
/// written, flushed, and renamed over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> MirrorResult<()> {
    let tmp = path.with_extension("tmp");
    (|| -> MirrorResult<()> {
        let mut f = File::create(&tmp)?;
        io::Write::write_all(&mut f, contents)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, path)?;
        Ok(())
    })()
    .with_context(|| format!("failed to write `{}`", path.display()))
}
