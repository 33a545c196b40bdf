#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod kernel;
pub mod merge;
pub mod source;
pub mod store;
pub mod telemetry;

pub use error::{Error, InternalError, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    Document, DocumentChange, DocumentError, DocumentPath, EntityName, ForeignKey, InternalKey,
    InvalidId, MergeError, Patch, SourceName, apply, diff, initial_document,
};
pub use crate::kernel::{Context, Outcome, Request, RetryPolicy, RoundSummary};
pub use crate::merge::{MergeOutcome, MergePolicy};
pub use crate::source::{DataSource, DataSourceError};
pub use crate::store::{MemoryStore, SqliteStore, Store, StoreError};
