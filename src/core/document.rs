//! The document value type: a recursive labelled tree with optional scalar
//! text at every node.
//!
//! JSON embeds into documents as follows: objects become internal nodes with
//! no scalar; strings, numbers and booleans become leaf scalars rendered as
//! text (booleans as `TRUE`/`FALSE`); `null` becomes a missing scalar; arrays
//! are rejected. Children are keyed by edge label in a `BTreeMap`, so
//! serialization, hashing and equality are deterministic without a separate
//! canonicalization pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::error::{DocumentError, InvalidLabel};
use super::path::DocumentPath;

/// Scalar text rendering of JSON `true`.
pub const TRUE_SCALAR: &str = "TRUE";
/// Scalar text rendering of JSON `false`.
pub const FALSE_SCALAR: &str = "FALSE";

/// A node in a document tree.
///
/// Equality is structural. The empty document (no scalar, no children) is
/// the identity of [`Document::overlay`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Document>,
}

impl Document {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A leaf document holding only a scalar.
    pub fn leaf(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            children: BTreeMap::new(),
        }
    }

    /// No scalar anywhere in the tree.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.values().all(Document::is_empty)
    }

    /// Embed a JSON value. Arrays cause a malformed-document error.
    pub fn from_json(json: &Value) -> Result<Self, DocumentError> {
        from_json_at(json, &mut DocumentPath::root())
    }

    /// Render back to JSON.
    ///
    /// A node carrying both a scalar and children cannot be represented in
    /// JSON; its scalar is dropped with a logged warning. The internal
    /// representation remains the source of truth across this boundary.
    pub fn to_json(&self) -> Value {
        to_json_at(self, &mut DocumentPath::root())
    }

    /// The scalar at `path`, if any.
    pub fn get(&self, path: &DocumentPath) -> Option<&str> {
        let mut node = self;
        for label in path.labels() {
            node = node.children.get(label)?;
        }
        node.value.as_deref()
    }

    /// Set the scalar at `path`, creating intermediate nodes as needed.
    pub fn set(&mut self, path: &DocumentPath, value: impl Into<String>) {
        let mut node = self;
        for label in path.labels() {
            node = node.children.entry(label.clone()).or_default();
        }
        node.value = Some(value.into());
    }

    /// Remove the scalar at `path`. Intermediate nodes left without scalar
    /// and children are pruned. Removing a nonexistent scalar is a no-op.
    pub fn unset(&mut self, path: &DocumentPath) {
        unset_at(self, path.labels());
    }

    /// Every `(path, scalar)` pair in the tree, in lexical path order.
    pub fn paths(&self) -> Vec<(DocumentPath, &str)> {
        let mut out = Vec::new();
        collect_paths(self, &mut DocumentPath::root(), &mut out);
        out
    }

    /// Right-biased pointwise union: children merge recursively, and the
    /// scalar of `other` wins wherever it is present.
    pub fn overlay(&self, other: &Document) -> Document {
        let mut merged = self.clone();
        overlay_into(&mut merged, other);
        merged
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries = f.debug_map();
        for (path, value) in self.paths() {
            entries.entry(&path.to_string(), &value);
        }
        entries.finish()
    }
}

fn from_json_at(json: &Value, at: &mut DocumentPath) -> Result<Document, DocumentError> {
    match json {
        Value::Null => Ok(Document::empty()),
        Value::Bool(true) => Ok(Document::leaf(TRUE_SCALAR)),
        Value::Bool(false) => Ok(Document::leaf(FALSE_SCALAR)),
        Value::Number(number) => Ok(Document::leaf(number.to_string())),
        Value::String(text) => Ok(Document::leaf(text.clone())),
        Value::Array(_) => Err(DocumentError::UnsupportedArray {
            path: at.to_string(),
        }),
        Value::Object(fields) => {
            let mut children = BTreeMap::new();
            for (label, child_json) in fields {
                if label.is_empty() {
                    return Err(InvalidLabel {
                        reason: format!("empty object key at `{at}`"),
                    }
                    .into());
                }
                at.push(label.clone());
                let child = from_json_at(child_json, at)?;
                at.pop();
                // Null fields and empty objects carry no scalars; keeping
                // them would make structurally-equal documents compare
                // unequal.
                if !child.is_empty() {
                    children.insert(label.clone(), child);
                }
            }
            Ok(Document {
                value: None,
                children,
            })
        }
    }
}

fn to_json_at(doc: &Document, at: &mut DocumentPath) -> Value {
    if doc.children.is_empty() {
        return match &doc.value {
            Some(text) => scalar_to_json(text),
            None => Value::Null,
        };
    }
    if doc.value.is_some() {
        tracing::warn!(path = %at, "dropping scalar of node with children during JSON render");
    }
    let mut fields = Map::new();
    for (label, child) in &doc.children {
        at.push(label.clone());
        fields.insert(label.clone(), to_json_at(child, at));
        at.pop();
    }
    Value::Object(fields)
}

fn scalar_to_json(text: &str) -> Value {
    match text {
        TRUE_SCALAR => Value::Bool(true),
        FALSE_SCALAR => Value::Bool(false),
        other => match other.parse::<Number>() {
            // Only round-trip numbers that render back to the same text, so
            // scalars like "007" stay strings.
            Ok(number) if number.to_string() == other => Value::Number(number),
            _ => Value::String(other.to_string()),
        },
    }
}

fn unset_at(node: &mut Document, labels: &[String]) -> bool {
    match labels.split_first() {
        None => {
            node.value = None;
        }
        Some((label, rest)) => {
            if let Some(child) = node.children.get_mut(label) {
                if unset_at(child, rest) {
                    node.children.remove(label);
                }
            }
        }
    }
    node.value.is_none() && node.children.is_empty()
}

fn collect_paths<'d>(
    doc: &'d Document,
    at: &mut DocumentPath,
    out: &mut Vec<(DocumentPath, &'d str)>,
) {
    if let Some(value) = doc.value.as_deref() {
        out.push((at.clone(), value));
    }
    for (label, child) in &doc.children {
        at.push(label.clone());
        collect_paths(child, at, out);
        at.pop();
    }
}

fn overlay_into(target: &mut Document, other: &Document) {
    if let Some(value) = &other.value {
        target.value = Some(value.clone());
    }
    for (label, child) in &other.children {
        overlay_into(target.children.entry(label.clone()).or_default(), child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(labels: &[&str]) -> DocumentPath {
        DocumentPath::new(labels.iter().copied()).unwrap()
    }

    #[test]
    fn embeds_scalars_as_text() {
        let doc = Document::from_json(&json!({
            "name": "Alice",
            "age": 30,
            "ratio": 0.5,
            "active": true,
            "retired": false,
            "nickname": null
        }))
        .unwrap();

        assert_eq!(doc.get(&path(&["name"])), Some("Alice"));
        assert_eq!(doc.get(&path(&["age"])), Some("30"));
        assert_eq!(doc.get(&path(&["ratio"])), Some("0.5"));
        assert_eq!(doc.get(&path(&["active"])), Some(TRUE_SCALAR));
        assert_eq!(doc.get(&path(&["retired"])), Some(FALSE_SCALAR));
        assert_eq!(doc.get(&path(&["nickname"])), None);
    }

    #[test]
    fn null_fields_embed_identically_to_absent_fields() {
        let with_null = Document::from_json(&json!({"name": "Alice", "nickname": null})).unwrap();
        let without = Document::from_json(&json!({"name": "Alice"})).unwrap();
        assert_eq!(with_null, without);
    }

    #[test]
    fn rejects_arrays_with_offending_path() {
        let err = Document::from_json(&json!({"tags": ["a", "b"]})).unwrap_err();
        match err {
            DocumentError::UnsupportedArray { path } => assert_eq!(path, "/tags"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_object_keys() {
        let err = Document::from_json(&json!({"": "x"})).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidLabel(_)));
    }

    #[test]
    fn set_creates_intermediates_and_unset_prunes() {
        let mut doc = Document::empty();
        doc.set(&path(&["a", "b", "c"]), "x");
        assert_eq!(doc.get(&path(&["a", "b", "c"])), Some("x"));

        doc.unset(&path(&["a", "b", "c"]));
        assert!(doc.is_empty());
        assert!(doc.children.is_empty(), "empty intermediates must be pruned");

        // Unsetting a missing path is a no-op.
        doc.unset(&path(&["nope"]));
        assert_eq!(doc, Document::empty());
    }

    #[test]
    fn unset_keeps_populated_siblings() {
        let mut doc = Document::empty();
        doc.set(&path(&["a", "b"]), "x");
        doc.set(&path(&["a", "c"]), "y");
        doc.unset(&path(&["a", "b"]));
        assert_eq!(doc.get(&path(&["a", "c"])), Some("y"));
        assert_eq!(doc.get(&path(&["a", "b"])), None);
    }

    #[test]
    fn paths_enumerates_in_lexical_order() {
        let doc = Document::from_json(&json!({
            "b": "2",
            "a": {"y": "4", "x": "3"},
        }))
        .unwrap();
        let listed: Vec<(String, &str)> = doc
            .paths()
            .into_iter()
            .map(|(p, v)| (p.to_string(), v))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("/a/x".to_string(), "3"),
                ("/a/y".to_string(), "4"),
                ("/b".to_string(), "2"),
            ]
        );
    }

    #[test]
    fn overlay_is_right_biased_and_recursive() {
        let left = Document::from_json(&json!({"a": {"x": "1"}, "keep": "l"})).unwrap();
        let right = Document::from_json(&json!({"a": {"x": "2", "y": "3"}})).unwrap();
        let merged = left.overlay(&right);
        assert_eq!(merged.get(&path(&["a", "x"])), Some("2"));
        assert_eq!(merged.get(&path(&["a", "y"])), Some("3"));
        assert_eq!(merged.get(&path(&["keep"])), Some("l"));
    }

    #[test]
    fn overlay_identity_is_empty() {
        let doc = Document::from_json(&json!({"a": "1", "b": {"c": true}})).unwrap();
        assert_eq!(doc.overlay(&Document::empty()), doc);
        assert_eq!(Document::empty().overlay(&doc), doc);
    }

    #[test]
    fn json_round_trip_for_representable_documents() {
        let json = json!({
            "name": "Alice",
            "age": 30,
            "flags": {"active": true, "retired": false},
        });
        let doc = Document::from_json(&json).unwrap();
        let back = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn to_json_drops_scalar_of_internal_node() {
        let mut doc = Document::empty();
        doc.set(&DocumentPath::root(), "root scalar");
        doc.set(&path(&["a"]), "1");
        assert_eq!(doc.to_json(), json!({"a": "1"}));
    }

    #[test]
    fn leading_zero_numbers_stay_strings() {
        let mut doc = Document::empty();
        doc.set(&path(&["zip"]), "007");
        assert_eq!(doc.to_json(), json!({"zip": "007"}));
    }
}
