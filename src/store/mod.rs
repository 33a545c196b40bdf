//! Persistent store: internal-key allocation, foreign-key bookkeeping,
//! initial documents and rejected patches.
//!
//! The store is split into capability tokens. [`StoreReader`] is the
//! read-only token handed to data-source adaptors; [`StoreTxn`] is the
//! read-write token the kernel holds for the duration of one request. Write
//! operations exist only on `StoreTxn`, so the restriction is enforced at
//! the interface boundary rather than by convention.

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{Document, EntityName, ForeignKey, InternalKey, Patch, SourceName};
use crate::error::Transience;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Another writer holds the store; retrying may succeed.
    #[error("store is busy: {reason}")]
    Busy { reason: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: u32, got: u32 },
    #[error("foreign key {fk} is already bound to {existing}")]
    ForeignKeyBound {
        fk: ForeignKey,
        existing: InternalKey,
    },
    #[error("{fk} does not belong to entity of {ik}")]
    EntityMismatch { ik: InternalKey, fk: ForeignKey },
    #[error("unknown internal key {ik}")]
    UnknownInternalKey { ik: InternalKey },
    #[error("stored row is undecodable: {reason}")]
    RowDecode { reason: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Busy { .. } => Transience::Retryable,
            StoreError::Sqlite(err) => match err.sqlite_error_code() {
                Some(rusqlite::ErrorCode::DatabaseBusy)
                | Some(rusqlite::ErrorCode::DatabaseLocked) => Transience::Retryable,
                _ => Transience::Permanent,
            },
            StoreError::Io { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

/// A rejected-patch audit row. These survive deletion of their internal key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedPatch {
    pub ik: InternalKey,
    pub source: SourceName,
    pub patch: Patch,
    pub reason: String,
    pub recorded_at_ms: u64,
}

/// Store entry point. `writer()` yields the single-writer path used by the
/// kernel; `reader()` yields the read-only token for adaptors and probes.
pub trait Store: Send + Sync {
    fn writer(&self) -> Box<dyn StoreWriter>;
    fn reader(&self) -> Box<dyn StoreReader>;
}

pub trait StoreWriter: Send {
    /// Open a read-write transaction. Acquires the writer lock: a second
    /// concurrent `begin` observes a retryable busy error until commit or
    /// rollback.
    fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;
}

/// Read-only store token.
pub trait StoreReader: Send {
    fn resolve_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError>;
    fn lookup_foreign_keys(
        &self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError>;
    fn read_initial_document(&self, ik: &InternalKey) -> Result<Option<Document>, StoreError>;
    fn list_rejected_patches(&self, ik: &InternalKey) -> Result<Vec<RejectedPatch>, StoreError>;
}

/// Read-write store token, scoped to one transaction. All writes commit
/// atomically or not at all.
pub trait StoreTxn {
    fn resolve_internal_key(&mut self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError>;
    fn lookup_foreign_keys(
        &mut self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError>;
    fn read_initial_document(&mut self, ik: &InternalKey) -> Result<Option<Document>, StoreError>;

    fn allocate_internal_key(&mut self, entity: &EntityName) -> Result<InternalKey, StoreError>;
    /// Bind `fk` to `ik`, replacing any previous key this source had for
    /// `ik`. Fails if the same foreign key is bound to a different internal
    /// key.
    fn record_foreign_key(&mut self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError>;
    fn delete_foreign_key(&mut self, fk: &ForeignKey) -> Result<(), StoreError>;
    /// Remove the internal key, cascading its foreign-key rows and initial
    /// document. Rejected-patch audit rows are kept.
    fn delete_internal_key(&mut self, ik: &InternalKey) -> Result<(), StoreError>;
    fn write_initial_document(
        &mut self,
        ik: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError>;
    fn delete_initial_document(&mut self, ik: &InternalKey) -> Result<(), StoreError>;
    fn record_rejected_patch(
        &mut self,
        ik: &InternalKey,
        source: &SourceName,
        patch: &Patch,
        reason: &str,
    ) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
