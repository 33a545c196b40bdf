//! The reconciliation core: documents, paths, patches, diffing and identity
//! atoms. Everything in this module is pure and in-memory.

mod diff;
mod document;
pub mod error;
mod identity;
mod patch;
mod path;

pub use diff::{apply, diff, initial_document};
pub use document::{Document, FALSE_SCALAR, TRUE_SCALAR};
pub use error::{DocumentError, InvalidId, InvalidLabel, MergeError};
pub use identity::{EntityName, ForeignKey, InternalKey, SourceName};
pub use patch::{DocumentChange, Patch};
pub use path::DocumentPath;
