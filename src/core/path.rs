//! Document paths: sequences of edge labels addressing a node in a document.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{DocumentError, InvalidLabel};

/// A finite sequence of edge labels. The empty path denotes the root.
///
/// Paths order lexicographically element-wise, so `a` sorts before `a/b`
/// and `a/b` before `ab`. This is the order `Document::paths` enumerates in
/// and the order canonical patches are sorted by.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPath(Vec<String>);

impl DocumentPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from labels, rejecting empty label text.
    pub fn new<I, S>(labels: I) -> Result<Self, DocumentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for label in labels {
            let label = label.into();
            if label.is_empty() {
                return Err(InvalidLabel {
                    reason: "edge labels must be non-empty".into(),
                }
                .into());
            }
            out.push(label);
        }
        Ok(Self(out))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, label: impl Into<String>) -> Result<Self, DocumentError> {
        let label = label.into();
        if label.is_empty() {
            return Err(InvalidLabel {
                reason: "edge labels must be non-empty".into(),
            }
            .into());
        }
        let mut labels = self.0.clone();
        labels.push(label);
        Ok(Self(labels))
    }

    pub(crate) fn push(&mut self, label: String) {
        debug_assert!(!label.is_empty());
        self.0.push(label);
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Debug for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentPath({self})")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for label in &self.0 {
            write!(f, "/{label}")?;
        }
        Ok(())
    }
}
