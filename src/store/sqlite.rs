//! SQLite-backed store.
//!
//! One connection per transaction or reader, `BEGIN IMMEDIATE` for writes so
//! rounds touching the same internal key serialize at the store. Schema v1
//! holds the four logical tables plus a `meta` table carrying the schema
//! version.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use std::collections::BTreeMap;

use crate::core::{Document, EntityName, ForeignKey, InternalKey, Patch, SourceName};

use super::{RejectedPatch, Store, StoreError, StoreReader, StoreTxn, StoreWriter, now_ms};

const SCHEMA_VERSION: u32 = 1;
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "\
CREATE TABLE meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) STRICT;
CREATE TABLE internal_keys (
    ik INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL
) STRICT;
CREATE TABLE foreign_keys (
    ik INTEGER NOT NULL REFERENCES internal_keys(ik) ON DELETE CASCADE,
    entity TEXT NOT NULL,
    source TEXT NOT NULL,
    fk TEXT NOT NULL,
    UNIQUE (ik, source),
    UNIQUE (entity, source, fk)
) STRICT;
CREATE TABLE initial_documents (
    ik INTEGER PRIMARY KEY REFERENCES internal_keys(ik) ON DELETE CASCADE,
    doc_json TEXT NOT NULL
) STRICT;
CREATE TABLE rejected_patches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ik INTEGER NOT NULL,
    entity TEXT NOT NULL,
    source TEXT NOT NULL,
    patch_json TEXT NOT NULL,
    reason TEXT NOT NULL,
    ts_ms INTEGER NOT NULL
) STRICT;
";

pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the store at `db_path`, validating the schema
    /// version.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(dir) = db_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = open_connection(&db_path, true)?;
        let is_new = !table_exists(&conn, "meta")?;
        if is_new {
            conn.execute_batch(SCHEMA)?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        } else {
            validate_schema_version(&conn)?;
        }
        drop(conn);

        Ok(Self { db_path })
    }
}

impl Store for SqliteStore {
    fn writer(&self) -> Box<dyn StoreWriter> {
        Box::new(SqliteWriter {
            db_path: self.db_path.clone(),
        })
    }

    fn reader(&self) -> Box<dyn StoreReader> {
        Box::new(SqliteReader {
            db_path: self.db_path.clone(),
        })
    }
}

fn open_connection(db_path: &Path, create: bool) -> Result<Connection, StoreError> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(db_path, flags)?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    // journal_mode returns the resulting mode as a row.
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn validate_schema_version(conn: &Connection) -> Result<(), StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let got: u32 = raw
        .as_deref()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    if got != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            got,
        });
    }
    Ok(())
}

struct SqliteWriter {
    db_path: PathBuf,
}

impl StoreWriter for SqliteWriter {
    fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let conn = open_connection(&self.db_path, false)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTxn {
            conn,
            closed: false,
        }))
    }
}

struct SqliteReader {
    db_path: PathBuf,
}

impl SqliteReader {
    fn conn(&self) -> Result<Connection, StoreError> {
        open_connection(&self.db_path, false)
    }
}

impl StoreReader for SqliteReader {
    fn resolve_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        resolve_internal_key(&self.conn()?, fk)
    }

    fn lookup_foreign_keys(
        &self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError> {
        lookup_foreign_keys(&self.conn()?, ik)
    }

    fn read_initial_document(&self, ik: &InternalKey) -> Result<Option<Document>, StoreError> {
        read_initial_document(&self.conn()?, ik)
    }

    fn list_rejected_patches(&self, ik: &InternalKey) -> Result<Vec<RejectedPatch>, StoreError> {
        list_rejected_patches(&self.conn()?, ik)
    }
}

struct SqliteTxn {
    conn: Connection,
    closed: bool,
}

impl Drop for SqliteTxn {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl StoreTxn for SqliteTxn {
    fn resolve_internal_key(&mut self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        resolve_internal_key(&self.conn, fk)
    }

    fn lookup_foreign_keys(
        &mut self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError> {
        lookup_foreign_keys(&self.conn, ik)
    }

    fn read_initial_document(&mut self, ik: &InternalKey) -> Result<Option<Document>, StoreError> {
        read_initial_document(&self.conn, ik)
    }

    fn allocate_internal_key(&mut self, entity: &EntityName) -> Result<InternalKey, StoreError> {
        self.conn.execute(
            "INSERT INTO internal_keys (entity) VALUES (?1)",
            params![entity.as_str()],
        )?;
        Ok(InternalKey::new(
            entity.clone(),
            self.conn.last_insert_rowid(),
        ))
    }

    fn record_foreign_key(&mut self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if ik.entity != fk.entity {
            return Err(StoreError::EntityMismatch {
                ik: ik.clone(),
                fk: fk.clone(),
            });
        }
        let bound: Option<i64> = self
            .conn
            .query_row(
                "SELECT ik FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
                params![fk.entity.as_str(), fk.source.as_str(), fk.key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = bound
            && existing != ik.id
        {
            return Err(StoreError::ForeignKeyBound {
                fk: fk.clone(),
                existing: InternalKey::new(fk.entity.clone(), existing),
            });
        }
        self.conn.execute(
            "INSERT INTO foreign_keys (ik, entity, source, fk) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(ik, source) DO UPDATE SET fk = excluded.fk",
            params![ik.id, fk.entity.as_str(), fk.source.as_str(), fk.key],
        )?;
        Ok(())
    }

    fn delete_foreign_key(&mut self, fk: &ForeignKey) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
            params![fk.entity.as_str(), fk.source.as_str(), fk.key],
        )?;
        Ok(())
    }

    fn delete_internal_key(&mut self, ik: &InternalKey) -> Result<(), StoreError> {
        // foreign_keys and initial_documents cascade; rejected_patches are
        // an audit trail and stay.
        self.conn.execute(
            "DELETE FROM internal_keys WHERE ik = ?1",
            params![ik.id],
        )?;
        Ok(())
    }

    fn write_initial_document(
        &mut self,
        ik: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let doc_json = serde_json::to_string(doc).map_err(|err| StoreError::RowDecode {
            reason: format!("document encode failed: {err}"),
        })?;
        self.conn.execute(
            "INSERT INTO initial_documents (ik, doc_json) VALUES (?1, ?2) \
             ON CONFLICT(ik) DO UPDATE SET doc_json = excluded.doc_json",
            params![ik.id, doc_json],
        )?;
        Ok(())
    }

    fn delete_initial_document(&mut self, ik: &InternalKey) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM initial_documents WHERE ik = ?1",
            params![ik.id],
        )?;
        Ok(())
    }

    fn record_rejected_patch(
        &mut self,
        ik: &InternalKey,
        source: &SourceName,
        patch: &Patch,
        reason: &str,
    ) -> Result<(), StoreError> {
        let patch_json = serde_json::to_string(patch).map_err(|err| StoreError::RowDecode {
            reason: format!("patch encode failed: {err}"),
        })?;
        self.conn.execute(
            "INSERT INTO rejected_patches (ik, entity, source, patch_json, reason, ts_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ik.id,
                ik.entity.as_str(),
                source.as_str(),
                patch_json,
                reason,
                now_ms() as i64
            ],
        )?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.closed = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK")?;
        self.closed = true;
        Ok(())
    }
}

fn resolve_internal_key(
    conn: &Connection,
    fk: &ForeignKey,
) -> Result<Option<InternalKey>, StoreError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT ik FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
            params![fk.entity.as_str(), fk.source.as_str(), fk.key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(|id| InternalKey::new(fk.entity.clone(), id)))
}

fn lookup_foreign_keys(
    conn: &Connection,
    ik: &InternalKey,
) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT source, fk FROM foreign_keys WHERE ik = ?1 ORDER BY source")?;
    let rows = stmt.query_map(params![ik.id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (source_raw, key) = row?;
        let source = SourceName::new(source_raw).map_err(|err| StoreError::RowDecode {
            reason: err.to_string(),
        })?;
        let fk = ForeignKey::new(ik.entity.clone(), source.clone(), key).map_err(|err| {
            StoreError::RowDecode {
                reason: err.to_string(),
            }
        })?;
        out.insert(source, fk);
    }
    Ok(out)
}

fn read_initial_document(
    conn: &Connection,
    ik: &InternalKey,
) -> Result<Option<Document>, StoreError> {
    let doc_json: Option<String> = conn
        .query_row(
            "SELECT doc_json FROM initial_documents WHERE ik = ?1",
            params![ik.id],
            |row| row.get(0),
        )
        .optional()?;
    match doc_json {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StoreError::RowDecode {
                reason: format!("document decode failed: {err}"),
            }),
    }
}

fn list_rejected_patches(
    conn: &Connection,
    ik: &InternalKey,
) -> Result<Vec<RejectedPatch>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT source, patch_json, reason, ts_ms FROM rejected_patches \
         WHERE ik = ?1 AND entity = ?2 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![ik.id, ik.entity.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (source_raw, patch_json, reason, ts_ms) = row?;
        let source = SourceName::new(source_raw).map_err(|err| StoreError::RowDecode {
            reason: err.to_string(),
        })?;
        let patch = serde_json::from_str(&patch_json).map_err(|err| StoreError::RowDecode {
            reason: format!("patch decode failed: {err}"),
        })?;
        out.push(RejectedPatch {
            ik: ik.clone(),
            source,
            patch,
            reason,
            recorded_at_ms: ts_ms as u64,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentChange, DocumentPath};

    fn entity() -> EntityName {
        EntityName::new("customer").unwrap()
    }

    fn fk(source: &str, key: &str) -> ForeignKey {
        ForeignKey::new(entity(), SourceName::new(source).unwrap(), key).unwrap()
    }

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("retcon.sqlite")).unwrap();
        (dir, store)
    }

    #[test]
    fn schema_round_trip() {
        let (_dir, store) = open_temp();
        let mut txn = store.writer().begin().unwrap();
        let ik = txn.allocate_internal_key(&entity()).unwrap();
        txn.record_foreign_key(&ik, &fk("data", "K1")).unwrap();
        let doc = Document::leaf("hello");
        txn.write_initial_document(&ik, &doc).unwrap();
        txn.commit().unwrap();

        let reader = store.reader();
        assert_eq!(reader.resolve_internal_key(&fk("data", "K1")).unwrap(), Some(ik.clone()));
        assert_eq!(reader.read_initial_document(&ik).unwrap(), Some(doc));
    }

    #[test]
    fn reopen_preserves_state_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("retcon.sqlite");
        let ik = {
            let store = SqliteStore::open(&db).unwrap();
            let mut txn = store.writer().begin().unwrap();
            let ik = txn.allocate_internal_key(&entity()).unwrap();
            txn.record_foreign_key(&ik, &fk("data", "K1")).unwrap();
            txn.commit().unwrap();
            ik
        };
        let store = SqliteStore::open(&db).unwrap();
        assert_eq!(
            store.reader().resolve_internal_key(&fk("data", "K1")).unwrap(),
            Some(ik)
        );
    }

    #[test]
    fn uncommitted_txn_rolls_back_on_drop() {
        let (_dir, store) = open_temp();
        {
            let mut txn = store.writer().begin().unwrap();
            let ik = txn.allocate_internal_key(&entity()).unwrap();
            txn.record_foreign_key(&ik, &fk("data", "K1")).unwrap();
            // dropped without commit
        }
        assert_eq!(
            store.reader().resolve_internal_key(&fk("data", "K1")).unwrap(),
            None
        );
    }

    #[test]
    fn foreign_key_binding_is_exclusive() {
        let (_dir, store) = open_temp();
        let mut txn = store.writer().begin().unwrap();
        let first = txn.allocate_internal_key(&entity()).unwrap();
        let second = txn.allocate_internal_key(&entity()).unwrap();
        txn.record_foreign_key(&first, &fk("data", "K1")).unwrap();
        let err = txn.record_foreign_key(&second, &fk("data", "K1")).unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyBound { .. }));
    }

    #[test]
    fn delete_internal_key_cascades_rows() {
        let (_dir, store) = open_temp();
        let mut txn = store.writer().begin().unwrap();
        let ik = txn.allocate_internal_key(&entity()).unwrap();
        txn.record_foreign_key(&ik, &fk("data", "K1")).unwrap();
        txn.write_initial_document(&ik, &Document::leaf("x")).unwrap();
        txn.delete_internal_key(&ik).unwrap();
        txn.commit().unwrap();

        let reader = store.reader();
        assert_eq!(reader.resolve_internal_key(&fk("data", "K1")).unwrap(), None);
        assert_eq!(reader.read_initial_document(&ik).unwrap(), None);
    }

    #[test]
    fn rejected_patches_survive_key_deletion() {
        let (_dir, store) = open_temp();
        let source = SourceName::new("data").unwrap();
        let patch = Patch::new(vec![DocumentChange::Insert {
            path: DocumentPath::new(["name"]).unwrap(),
            value: "Al".into(),
        }]);

        let mut txn = store.writer().begin().unwrap();
        let ik = txn.allocate_internal_key(&entity()).unwrap();
        txn.record_rejected_patch(&ik, &source, &patch, "conflict at /name")
            .unwrap();
        txn.delete_internal_key(&ik).unwrap();
        txn.commit().unwrap();

        let rows = store.reader().list_rejected_patches(&ik).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].patch, patch);
        assert_eq!(rows[0].reason, "conflict at /name");
    }
}
