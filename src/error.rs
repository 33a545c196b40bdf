use thiserror::Error;

use crate::config::ConfigError;
use crate::core::error::{DocumentError, InvalidId, MergeError};
use crate::source::DataSourceError;
use crate::store::StoreError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Unexpected host-level failure; always surfaced, never recovered locally.
#[derive(Debug, Error)]
#[error("internal error: {reason}")]
pub struct InternalError {
    pub reason: String,
}

impl InternalError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Crate-level error: a thin wrapper over the capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] DataSourceError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Id(#[from] InvalidId),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Config(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Source(e) => e.transience(),
            Error::Document(e) => e.transience(),
            Error::Merge(e) => e.transience(),
            Error::Id(e) => e.transience(),
            Error::Internal(_) => Transience::Unknown,
        }
    }
}
