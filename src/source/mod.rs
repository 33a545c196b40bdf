//! Data-source adaptors: CRUD of one document identified by a source-local
//! foreign key.
//!
//! Adaptor failures are opaque to the kernel beyond their category: a source
//! is either unavailable for this round, or it reports the key as gone, or
//! it produced a document the core refuses to decode. None of these abort a
//! reconciliation round.

mod command;

use thiserror::Error;

use crate::core::{Document, DocumentError, ForeignKey};
use crate::error::Transience;

pub use command::{CommandSource, CommandTemplates};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DataSourceError {
    /// The source could not be reached or refused the call; it is treated
    /// as absent for the current round and retried on the next one.
    #[error("source unavailable: {reason}")]
    Unavailable { reason: String },
    /// The source says the key does not exist.
    #[error("source reports {fk} gone")]
    Gone { fk: ForeignKey },
    /// The source answered with a document the core cannot decode.
    #[error(transparent)]
    Malformed(#[from] DocumentError),
}

impl DataSourceError {
    pub fn transience(&self) -> Transience {
        match self {
            DataSourceError::Unavailable { .. } => Transience::Retryable,
            DataSourceError::Gone { .. } => Transience::Permanent,
            DataSourceError::Malformed(err) => err.transience(),
        }
    }
}

/// Adaptor contract for one `(entity, source)` pair.
///
/// `update` may return a changed foreign key; the kernel then rebinds the
/// mapping. Implementations must be callable from worker threads.
pub trait DataSource: Send + Sync {
    fn create(&self, doc: &Document) -> Result<ForeignKey, DataSourceError>;
    fn read(&self, fk: &ForeignKey) -> Result<Document, DataSourceError>;
    fn update(&self, fk: &ForeignKey, doc: &Document) -> Result<ForeignKey, DataSourceError>;
    fn delete(&self, fk: &ForeignKey) -> Result<(), DataSourceError>;
}
