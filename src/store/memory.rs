//! In-memory store used by tests and embedders.
//!
//! Transactions clone the state, mutate the clone, and swap it back on
//! commit; a gate enforces the same single-writer discipline as the SQLite
//! store's immediate transactions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::core::{Document, EntityName, ForeignKey, InternalKey, Patch, SourceName};

use super::{RejectedPatch, Store, StoreError, StoreReader, StoreTxn, StoreWriter, now_ms};

#[derive(Clone, Default)]
struct MemoryState {
    next_id: i64,
    entities: BTreeMap<i64, EntityName>,
    ik_by_fk: BTreeMap<(EntityName, SourceName, String), i64>,
    fk_by_ik: BTreeMap<(i64, SourceName), String>,
    initials: BTreeMap<i64, Document>,
    rejected: Vec<RejectedPatch>,
}

impl MemoryState {
    fn resolve(&self, fk: &ForeignKey) -> Option<InternalKey> {
        let id = self
            .ik_by_fk
            .get(&(fk.entity.clone(), fk.source.clone(), fk.key.clone()))?;
        Some(InternalKey::new(fk.entity.clone(), *id))
    }

    fn foreign_keys(&self, ik: &InternalKey) -> BTreeMap<SourceName, ForeignKey> {
        self.fk_by_ik
            .iter()
            .filter(|((id, _), _)| *id == ik.id)
            .map(|((_, source), key)| {
                (
                    source.clone(),
                    ForeignKey {
                        entity: ik.entity.clone(),
                        source: source.clone(),
                        key: key.clone(),
                    },
                )
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    write_gate: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn writer(&self) -> Box<dyn StoreWriter> {
        Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            write_gate: Arc::clone(&self.write_gate),
        })
    }

    fn reader(&self) -> Box<dyn StoreReader> {
        Box::new(MemoryReader {
            state: Arc::clone(&self.state),
        })
    }
}

struct MemoryWriter {
    state: Arc<RwLock<MemoryState>>,
    write_gate: Arc<AtomicBool>,
}

impl StoreWriter for MemoryWriter {
    fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        if self
            .write_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StoreError::Busy {
                reason: "write transaction already open".into(),
            });
        }
        let working = self.state.read().expect("store lock poisoned").clone();
        Ok(Box::new(MemoryTxn {
            state: Arc::clone(&self.state),
            write_gate: Arc::clone(&self.write_gate),
            working,
            closed: false,
        }))
    }
}

struct MemoryReader {
    state: Arc<RwLock<MemoryState>>,
}

impl StoreReader for MemoryReader {
    fn resolve_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        Ok(self.state.read().expect("store lock poisoned").resolve(fk))
    }

    fn lookup_foreign_keys(
        &self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError> {
        Ok(self
            .state
            .read()
            .expect("store lock poisoned")
            .foreign_keys(ik))
    }

    fn read_initial_document(&self, ik: &InternalKey) -> Result<Option<Document>, StoreError> {
        Ok(self
            .state
            .read()
            .expect("store lock poisoned")
            .initials
            .get(&ik.id)
            .cloned())
    }

    fn list_rejected_patches(&self, ik: &InternalKey) -> Result<Vec<RejectedPatch>, StoreError> {
        Ok(self
            .state
            .read()
            .expect("store lock poisoned")
            .rejected
            .iter()
            .filter(|row| row.ik == *ik)
            .cloned()
            .collect())
    }
}

struct MemoryTxn {
    state: Arc<RwLock<MemoryState>>,
    write_gate: Arc<AtomicBool>,
    working: MemoryState,
    closed: bool,
}

impl MemoryTxn {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.write_gate.store(false, Ordering::Release);
        }
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        self.release();
    }
}

impl StoreTxn for MemoryTxn {
    fn resolve_internal_key(&mut self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        Ok(self.working.resolve(fk))
    }

    fn lookup_foreign_keys(
        &mut self,
        ik: &InternalKey,
    ) -> Result<BTreeMap<SourceName, ForeignKey>, StoreError> {
        Ok(self.working.foreign_keys(ik))
    }

    fn read_initial_document(&mut self, ik: &InternalKey) -> Result<Option<Document>, StoreError> {
        Ok(self.working.initials.get(&ik.id).cloned())
    }

    fn allocate_internal_key(&mut self, entity: &EntityName) -> Result<InternalKey, StoreError> {
        self.working.next_id += 1;
        let id = self.working.next_id;
        self.working.entities.insert(id, entity.clone());
        Ok(InternalKey::new(entity.clone(), id))
    }

    fn record_foreign_key(&mut self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if ik.entity != fk.entity {
            return Err(StoreError::EntityMismatch {
                ik: ik.clone(),
                fk: fk.clone(),
            });
        }
        if !self.working.entities.contains_key(&ik.id) {
            return Err(StoreError::UnknownInternalKey { ik: ik.clone() });
        }
        let triple = (fk.entity.clone(), fk.source.clone(), fk.key.clone());
        if let Some(existing) = self.working.ik_by_fk.get(&triple)
            && *existing != ik.id
        {
            return Err(StoreError::ForeignKeyBound {
                fk: fk.clone(),
                existing: InternalKey::new(fk.entity.clone(), *existing),
            });
        }
        // Replace any previous key this source had for the internal key.
        if let Some(old_key) = self
            .working
            .fk_by_ik
            .insert((ik.id, fk.source.clone()), fk.key.clone())
            && old_key != fk.key
        {
            self.working
                .ik_by_fk
                .remove(&(fk.entity.clone(), fk.source.clone(), old_key));
        }
        self.working.ik_by_fk.insert(triple, ik.id);
        Ok(())
    }

    fn delete_foreign_key(&mut self, fk: &ForeignKey) -> Result<(), StoreError> {
        let triple = (fk.entity.clone(), fk.source.clone(), fk.key.clone());
        if let Some(id) = self.working.ik_by_fk.remove(&triple) {
            self.working.fk_by_ik.remove(&(id, fk.source.clone()));
        }
        Ok(())
    }

    fn delete_internal_key(&mut self, ik: &InternalKey) -> Result<(), StoreError> {
        self.working.entities.remove(&ik.id);
        self.working.initials.remove(&ik.id);
        let sources: Vec<SourceName> = self
            .working
            .fk_by_ik
            .iter()
            .filter(|((id, _), _)| *id == ik.id)
            .map(|((_, source), _)| source.clone())
            .collect();
        for source in sources {
            if let Some(key) = self.working.fk_by_ik.remove(&(ik.id, source.clone())) {
                self.working
                    .ik_by_fk
                    .remove(&(ik.entity.clone(), source, key));
            }
        }
        Ok(())
    }

    fn write_initial_document(
        &mut self,
        ik: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError> {
        if !self.working.entities.contains_key(&ik.id) {
            return Err(StoreError::UnknownInternalKey { ik: ik.clone() });
        }
        self.working.initials.insert(ik.id, doc.clone());
        Ok(())
    }

    fn delete_initial_document(&mut self, ik: &InternalKey) -> Result<(), StoreError> {
        self.working.initials.remove(&ik.id);
        Ok(())
    }

    fn record_rejected_patch(
        &mut self,
        ik: &InternalKey,
        source: &SourceName,
        patch: &Patch,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.working.rejected.push(RejectedPatch {
            ik: ik.clone(),
            source: source.clone(),
            patch: patch.clone(),
            reason: reason.to_string(),
            recorded_at_ms: now_ms(),
        });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.state.write().expect("store lock poisoned") = std::mem::take(&mut self.working);
        self.release();
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}
