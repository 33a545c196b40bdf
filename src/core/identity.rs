//! Identity atoms: entity names, source names, foreign and internal keys.
//!
//! Entity and source names are runtime-tagged values validated against the
//! configured universe by the registry at request entry. A foreign key is
//! opaque text scoped by its `(entity, source)` pair; internal keys are
//! allocated by the store and stable across reconciliation rounds.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidId;

fn valid_name(raw: &str) -> Result<(), String> {
    if raw.is_empty() {
        return Err("empty".into());
    }
    if raw
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err("must not contain whitespace or control characters".into());
    }
    Ok(())
}

/// A logical kind of record managed by Retcon (e.g. `customer`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(String);

impl EntityName {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        match valid_name(&raw) {
            Ok(()) => Ok(Self(raw)),
            Err(reason) => Err(InvalidId::Entity { raw, reason }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityName({:?})", self.0)
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An external system holding one view of entities (e.g. `data`).
///
/// The ascending `Ord` on source names is load-bearing: merge consumes
/// per-source patches in this order, and tie-breaking policies pick the
/// largest name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        match valid_name(&raw) {
            Ok(()) => Ok(Self(raw)),
            Err(reason) => Err(InvalidId::Source { raw, reason }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceName({:?})", self.0)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source-assigned identifier for one record in that source. The key text
/// is opaque to the kernel.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub entity: EntityName,
    pub source: SourceName,
    pub key: String,
}

impl ForeignKey {
    pub fn new(
        entity: EntityName,
        source: SourceName,
        key: impl Into<String>,
    ) -> Result<Self, InvalidId> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidId::ForeignKey {
                raw: key,
                reason: "empty".into(),
            });
        }
        Ok(Self {
            entity,
            source,
            key,
        })
    }

    /// Same `(entity, source)` scope, different key text.
    pub fn with_key(&self, key: impl Into<String>) -> Result<Self, InvalidId> {
        Self::new(self.entity.clone(), self.source.clone(), key)
    }
}

impl fmt::Debug for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignKey({self})")
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.source, self.key)
    }
}

/// Kernel-assigned identifier for one logical entity instance, scoped by
/// entity name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalKey {
    pub entity: EntityName,
    pub id: i64,
}

impl InternalKey {
    pub fn new(entity: EntityName, id: i64) -> Self {
        Self { entity, id }
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalKey({self})")
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_reject_empty_and_whitespace() {
        assert!(EntityName::new("").is_err());
        assert!(EntityName::new("cus tomer").is_err());
        assert!(SourceName::new("test\tresults").is_err());
        assert!(SourceName::new("test-results").is_ok());
    }

    #[test]
    fn foreign_keys_reject_empty_key_text() {
        let entity = EntityName::new("customer").unwrap();
        let source = SourceName::new("data").unwrap();
        assert!(ForeignKey::new(entity.clone(), source.clone(), "").is_err());
        let fk = ForeignKey::new(entity, source, "K1").unwrap();
        assert_eq!(fk.to_string(), "customer/data/K1");
    }

    #[test]
    fn source_names_order_ascending() {
        let data = SourceName::new("data").unwrap();
        let tests = SourceName::new("test-results").unwrap();
        assert!(data < tests);
    }
}
