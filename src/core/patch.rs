//! Patches: first-class sequences of insert/delete operations over document
//! paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::path::DocumentPath;

/// One patch operation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DocumentChange {
    /// Remove the scalar at `path`; empty intermediate nodes are pruned.
    Delete { path: DocumentPath },
    /// Create or overwrite the scalar at `path`, creating intermediate
    /// nodes as needed.
    Insert { path: DocumentPath, value: String },
}

// Variant order above gives Delete < Insert, which is the canonical sort
// order at equal paths.

impl DocumentChange {
    pub fn path(&self) -> &DocumentPath {
        match self {
            DocumentChange::Delete { path } => path,
            DocumentChange::Insert { path, .. } => path,
        }
    }
}

impl fmt::Display for DocumentChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentChange::Delete { path } => write!(f, "delete {path}"),
            DocumentChange::Insert { path, value } => write!(f, "insert {path} = {value:?}"),
        }
    }
}

/// An ordered sequence of changes. Patches compose by concatenation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<DocumentChange>);

impl Patch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(ops: Vec<DocumentChange>) -> Self {
        Self(ops)
    }

    pub fn ops(&self) -> &[DocumentChange] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, op: DocumentChange) {
        self.0.push(op);
    }

    /// Concatenation; the canonical form of the result applies `other`'s
    /// operations on top of `self`'s.
    pub fn concat(mut self, other: Patch) -> Patch {
        self.0.extend(other.0);
        self
    }

    /// Canonical form: one operation per path (the operation appearing last
    /// in sequence order wins, so a later insert supersedes earlier inserts
    /// and deletes at that path, and a later delete supersedes earlier
    /// inserts), sorted by `(path, kind)` with deletes before inserts.
    ///
    /// Idempotent: `p.canonicalize().canonicalize() == p.canonicalize()`.
    pub fn canonicalize(self) -> Patch {
        let mut last_per_path: std::collections::BTreeMap<DocumentPath, DocumentChange> =
            std::collections::BTreeMap::new();
        for op in self.0 {
            last_per_path.insert(op.path().clone(), op);
        }
        let mut ops: Vec<DocumentChange> = last_per_path.into_values().collect();
        ops.sort();
        Patch(ops)
    }
}

impl FromIterator<DocumentChange> for Patch {
    fn from_iter<I: IntoIterator<Item = DocumentChange>>(ops: I) -> Self {
        Patch(ops.into_iter().collect())
    }
}

impl IntoIterator for Patch {
    type Item = DocumentChange;
    type IntoIter = std::vec::IntoIter<DocumentChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(labels: &[&str]) -> DocumentPath {
        DocumentPath::new(labels.iter().copied()).unwrap()
    }

    fn insert(labels: &[&str], value: &str) -> DocumentChange {
        DocumentChange::Insert {
            path: path(labels),
            value: value.into(),
        }
    }

    fn delete(labels: &[&str]) -> DocumentChange {
        DocumentChange::Delete { path: path(labels) }
    }

    #[test]
    fn later_insert_supersedes_earlier_ops_at_same_path() {
        let patch = Patch::new(vec![
            insert(&["a"], "1"),
            delete(&["a"]),
            insert(&["a"], "2"),
        ])
        .canonicalize();
        assert_eq!(patch.ops(), &[insert(&["a"], "2")]);
    }

    #[test]
    fn later_delete_supersedes_earlier_inserts() {
        let patch = Patch::new(vec![insert(&["a"], "1"), delete(&["a"])]).canonicalize();
        assert_eq!(patch.ops(), &[delete(&["a"])]);
    }

    #[test]
    fn sorts_by_path_then_kind() {
        let patch = Patch::new(vec![
            insert(&["b"], "2"),
            delete(&["a"]),
            insert(&["a", "x"], "1"),
        ])
        .canonicalize();
        assert_eq!(
            patch.ops(),
            &[delete(&["a"]), insert(&["a", "x"], "1"), insert(&["b"], "2")]
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let patch = Patch::new(vec![
            insert(&["b"], "2"),
            delete(&["b"]),
            insert(&["a"], "1"),
            insert(&["a"], "3"),
        ]);
        let once = patch.clone().canonicalize();
        assert_eq!(once.clone().canonicalize(), once);
    }

    #[test]
    fn concat_then_canonicalize_applies_right_side_last() {
        let left = Patch::new(vec![insert(&["a"], "1")]);
        let right = Patch::new(vec![delete(&["a"]), insert(&["b"], "2")]);
        let combined = left.concat(right).canonicalize();
        assert_eq!(combined.ops(), &[delete(&["a"]), insert(&["b"], "2")]);
    }
}
