//! Structural diff and patch application over documents.
//!
//! These functions are pure and total; `apply` never fails, and
//! `apply(a, diff(a, b)) == b` for all documents.

use std::collections::BTreeMap;

use super::document::Document;
use super::patch::{DocumentChange, Patch};
use super::path::DocumentPath;

/// Canonical patch transforming `a` into `b`.
pub fn diff(a: &Document, b: &Document) -> Patch {
    let before: BTreeMap<DocumentPath, &str> = a.paths().into_iter().collect();
    let after: BTreeMap<DocumentPath, &str> = b.paths().into_iter().collect();

    let mut ops = Vec::new();
    for (path, value) in &before {
        match after.get(path) {
            Some(new_value) if new_value == value => {}
            Some(new_value) => ops.push(DocumentChange::Insert {
                path: path.clone(),
                value: (*new_value).to_string(),
            }),
            None => ops.push(DocumentChange::Delete { path: path.clone() }),
        }
    }
    for (path, value) in &after {
        if !before.contains_key(path) {
            ops.push(DocumentChange::Insert {
                path: path.clone(),
                value: (*value).to_string(),
            });
        }
    }
    Patch::new(ops).canonicalize()
}

/// Apply a patch. Deletes on nonexistent paths are no-ops, inserts create
/// intermediate nodes, and emptied internal nodes are pruned.
pub fn apply(doc: &Document, patch: &Patch) -> Document {
    let mut out = doc.clone();
    for op in patch.ops() {
        match op {
            DocumentChange::Insert { path, value } => out.set(path, value.clone()),
            DocumentChange::Delete { path } => out.unset(path),
        }
    }
    out
}

/// The "agreement" of a collection of documents: contains `(path, scalar)`
/// iff every input document holds that scalar at that path. Empty input
/// yields the empty document. Used as the common-ancestor surrogate when no
/// stored initial document exists.
pub fn initial_document(docs: &[Document]) -> Document {
    let Some((first, rest)) = docs.split_first() else {
        return Document::empty();
    };
    let mut agreed: BTreeMap<DocumentPath, &str> = first.paths().into_iter().collect();
    for doc in rest {
        let view: BTreeMap<DocumentPath, &str> = doc.paths().into_iter().collect();
        agreed.retain(|path, value| view.get(path).copied() == Some(*value));
    }
    let mut out = Document::empty();
    for (path, value) in agreed {
        out.set(&path, value);
    }
    out
}
