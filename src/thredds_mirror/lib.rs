//! Mirrors scientific datasets advertised by THREDDS catalogues into an
//! object store or local filesystem, maintaining an authoritative
//! metadata index.
//!
//! Each externally triggered run walks a set of download definitions and
//! converges the mirror on the upstream catalogues: new files are
//! fetched, changed files re-fetched, files missing from the sink are
//! tombstoned, and corrupted downloads are recorded and alerted on. The
//! interesting machinery lives in [`ops::reconcile`] (the diff) and
//! [`ops::pipeline`] (the download-verify-publish pipeline); everything
//! around them is a seam for a deployment-specific collaborator.

pub use crate::util::errors::MirrorResult;

pub mod core;
pub mod notify;
pub mod ops;
pub mod scan;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod util;
