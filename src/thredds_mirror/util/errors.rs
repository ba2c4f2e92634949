use std::fmt;

pub type MirrorResult<T> = anyhow::Result<T>;

/// A non-2xx response was received for a request that requires one.
#[derive(Debug, thiserror::Error)]
#[error("failed to get a successful HTTP response from `{url}`, got {code}")]
pub struct HttpNotSuccessful {
    pub code: u32,
    pub url: String,
}

/// A transfer grew past the single-object cap and was aborted.
#[derive(Debug, thiserror::Error)]
#[error("transfer of `{url}` exceeded the {cap}-byte single-object cap")]
pub struct TransferTooLarge {
    pub url: String,
    pub cap: u64,
}

/// Wrapper for errors that indicate a bug in this crate rather than a
/// problem with the environment or the upstream catalogue.
#[derive(Debug)]
pub struct InternalError {
    inner: anyhow::Error,
}

impl InternalError {
    pub fn new(inner: anyhow::Error) -> InternalError {
        InternalError { inner }
    }
}

impl std::error::Error for InternalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

pub fn internal<S: fmt::Display>(error: S) -> anyhow::Error {
    InternalError::new(anyhow::format_err!("{}", error)).into()
}

/// Renders an error and its cause chain on one line, for the summary lists
/// and notification payloads where a multi-line report is unreadable.
pub fn display_causes(error: &anyhow::Error) -> String {
    error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
