//! Core capability errors (document decoding, identity validation, merge
//! invariants).
//!
//! These are bounded and stable: they represent domain refusal states, not
//! library implementation details.

use thiserror::Error;

use crate::error::Transience;

/// Invalid edge label text.
#[derive(Debug, Error, Clone)]
#[error("invalid label: {reason}")]
pub struct InvalidLabel {
    pub reason: String,
}

/// Document embedding / decoding failures.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum DocumentError {
    #[error("arrays are not supported in documents (at `{path}`)")]
    UnsupportedArray { path: String },
    #[error(transparent)]
    InvalidLabel(#[from] InvalidLabel),
    #[error("document is not valid JSON: {reason}")]
    MalformedJson { reason: String },
}

impl DocumentError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

/// Invalid entity/source/key identity values.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("entity name `{raw}` is invalid: {reason}")]
    Entity { raw: String, reason: String },
    #[error("source name `{raw}` is invalid: {reason}")]
    Source { raw: String, reason: String },
    #[error("foreign key `{raw}` is invalid: {reason}")]
    ForeignKey { raw: String, reason: String },
}

impl InvalidId {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

/// Invariant violation inside a merge policy. Should be unreachable; if one
/// of these surfaces it is an internal bug, never a recoverable condition.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum MergeError {
    #[error("merge produced a non-canonical patch at `{path}`")]
    NonCanonicalOutput { path: String },
}

impl MergeError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}
