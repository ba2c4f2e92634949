//! Publish destinations.
//!
//! A sink hides the difference between "rename into place on a local
//! filesystem" and "multi-part upload to an object store" behind one
//! capability, so the pipeline never branches on URI schemes.

use std::path::Path;

use crate::core::definition::{Output, SinkKind};
use crate::util::errors::MirrorResult;

pub use self::file::FileSink;
pub use self::s3::S3Sink;

pub mod file;
pub mod s3;

pub trait Sink {
    /// Makes the fully downloaded temporary file visible at `dest_uri`.
    /// The temporary file may be consumed (renamed away) on success;
    /// callers must tolerate either.
    fn publish(&self, temp: &Path, dest_uri: &str) -> MirrorResult<()>;

    /// Probes whether an object currently exists at `dest_uri`.
    fn exists(&self, dest_uri: &str) -> MirrorResult<bool>;

    /// Removes the object at `dest_uri` if present.
    fn remove(&self, dest_uri: &str) -> MirrorResult<()>;
}

/// Builds the sink for a definition's output descriptor.
pub fn for_output(output: &Output) -> MirrorResult<Box<dyn Sink>> {
    match output.kind {
        SinkKind::File => Ok(Box::new(FileSink::new())),
        SinkKind::S3 => Ok(Box::new(S3Sink::from_env()?)),
    }
}
