//! Merge policies: deterministic resolution of per-source patches derived
//! from a common ancestor.
//!
//! A policy is a pure function of `(initial, [(source, patch)])`. Inputs are
//! canonicalized and consumed in ascending source-name order, so the outcome
//! is independent of the order patches were gathered in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{Document, DocumentChange, DocumentPath, Patch, SourceName};

/// Built-in merge policies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Any conflict rejects every conflicting operation; non-conflicting
    /// operations are all accepted.
    RejectAll,
    /// Accept everything; at a conflicting path the source with the largest
    /// name wins. Nothing is rejected.
    IgnoreConflicts,
    /// Accept only operations from the named source; every operation from
    /// any other source is rejected.
    TrustOnly(SourceName),
    /// Accept everything, ties broken as in `ignore-conflicts`.
    MergeAll,
}

/// Error for unrecognized policy strings in configuration.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown merge policy `{raw}`")]
pub struct UnknownPolicy {
    pub raw: String,
}

impl FromStr for MergePolicy {
    type Err = UnknownPolicy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "reject-all" => Ok(MergePolicy::RejectAll),
            "ignore-conflicts" => Ok(MergePolicy::IgnoreConflicts),
            "merge-all" => Ok(MergePolicy::MergeAll),
            other => match other.strip_prefix("trust-only:") {
                Some(source) => SourceName::new(source.trim())
                    .map(MergePolicy::TrustOnly)
                    .map_err(|_| UnknownPolicy { raw: raw.into() }),
                None => Err(UnknownPolicy { raw: raw.into() }),
            },
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::RejectAll => f.write_str("reject-all"),
            MergePolicy::IgnoreConflicts => f.write_str("ignore-conflicts"),
            MergePolicy::TrustOnly(source) => write!(f, "trust-only:{source}"),
            MergePolicy::MergeAll => f.write_str("merge-all"),
        }
    }
}

/// Result of merging per-source patches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Accepted operations, canonical.
    pub merged: Patch,
    /// Rejected operations grouped per source, ascending source order,
    /// each patch canonical.
    pub rejected: Vec<(SourceName, Patch)>,
}

impl MergePolicy {
    /// Merge patches derived from a common `initial`. Pure and
    /// deterministic: shuffling the input yields bitwise-identical output.
    pub fn merge(&self, initial: &Document, patches: &[(SourceName, Patch)]) -> MergeOutcome {
        let _ = initial;

        // Canonical gathering order: by source name, one canonical patch per
        // source (later entries for the same source compose on top).
        let mut per_source: BTreeMap<SourceName, Patch> = BTreeMap::new();
        for (source, patch) in patches {
            let slot = per_source.entry(source.clone()).or_default();
            *slot = std::mem::take(slot).concat(patch.clone());
        }
        for patch in per_source.values_mut() {
            *patch = std::mem::take(patch).canonicalize();
        }

        match self {
            MergePolicy::TrustOnly(trusted) => trust_only(trusted, per_source),
            MergePolicy::RejectAll => reject_all(per_source),
            MergePolicy::IgnoreConflicts | MergePolicy::MergeAll => last_wins(per_source),
        }
    }
}

fn by_path(
    per_source: &BTreeMap<SourceName, Patch>,
) -> BTreeMap<DocumentPath, Vec<(SourceName, DocumentChange)>> {
    let mut grouped: BTreeMap<DocumentPath, Vec<(SourceName, DocumentChange)>> = BTreeMap::new();
    for (source, patch) in per_source {
        for op in patch.ops() {
            grouped
                .entry(op.path().clone())
                .or_default()
                .push((source.clone(), op.clone()));
        }
    }
    grouped
}

/// Two sources conflict at a path when their operations there differ.
/// Identical operations (e.g. the same insert value) do not conflict.
fn is_conflicting(ops: &[(SourceName, DocumentChange)]) -> bool {
    ops.iter().any(|(_, op)| op != &ops[0].1)
}

fn reject_all(per_source: BTreeMap<SourceName, Patch>) -> MergeOutcome {
    let mut merged = Patch::empty();
    let mut rejected: BTreeMap<SourceName, Patch> = BTreeMap::new();
    for (_, ops) in by_path(&per_source) {
        if is_conflicting(&ops) {
            for (source, op) in ops {
                rejected.entry(source).or_default().push(op);
            }
        } else {
            // All operations at this path are identical; accept one.
            merged.push(ops[0].1.clone());
        }
    }
    finish(merged, rejected)
}

fn last_wins(per_source: BTreeMap<SourceName, Patch>) -> MergeOutcome {
    let mut merged = Patch::empty();
    for (_, ops) in by_path(&per_source) {
        // Sources arrive ascending; the last one wins the tie.
        let (_, winner) = ops.last().expect("path group is non-empty");
        merged.push(winner.clone());
    }
    finish(merged, BTreeMap::new())
}

fn trust_only(trusted: &SourceName, per_source: BTreeMap<SourceName, Patch>) -> MergeOutcome {
    let mut merged = Patch::empty();
    let mut rejected: BTreeMap<SourceName, Patch> = BTreeMap::new();
    for (source, patch) in per_source {
        if &source == trusted {
            merged = merged.concat(patch);
        } else if !patch.is_empty() {
            rejected.insert(source, patch);
        }
    }
    finish(merged, rejected)
}

fn finish(merged: Patch, rejected: BTreeMap<SourceName, Patch>) -> MergeOutcome {
    MergeOutcome {
        merged: merged.canonicalize(),
        rejected: rejected
            .into_iter()
            .map(|(source, patch)| (source, patch.canonicalize()))
            .filter(|(_, patch)| !patch.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    fn source(name: &str) -> SourceName {
        SourceName::new(name).unwrap()
    }

    fn conflicting_inputs() -> (Document, Vec<(SourceName, Patch)>) {
        let initial = doc(json!({"name": "Alice"}));
        let data_view = doc(json!({"name": "Alicia"}));
        let tests_view = doc(json!({"name": "Al"}));
        let patches = vec![
            (source("data"), diff(&initial, &data_view)),
            (source("test-results"), diff(&initial, &tests_view)),
        ];
        (initial, patches)
    }

    #[test]
    fn parses_policy_strings() {
        assert_eq!("reject-all".parse::<MergePolicy>().unwrap(), MergePolicy::RejectAll);
        assert_eq!(
            "trust-only:data".parse::<MergePolicy>().unwrap(),
            MergePolicy::TrustOnly(source("data"))
        );
        assert!("first-wins".parse::<MergePolicy>().is_err());
        assert!("trust-only:".parse::<MergePolicy>().is_err());
    }

    #[test]
    fn ignore_conflicts_takes_largest_source_name() {
        let (initial, patches) = conflicting_inputs();
        let outcome = MergePolicy::IgnoreConflicts.merge(&initial, &patches);
        assert!(outcome.rejected.is_empty());
        let merged = crate::core::apply(&initial, &outcome.merged);
        assert_eq!(merged, doc(json!({"name": "Al"})));
    }

    #[test]
    fn merge_all_matches_ignore_conflicts() {
        let (initial, patches) = conflicting_inputs();
        assert_eq!(
            MergePolicy::MergeAll.merge(&initial, &patches),
            MergePolicy::IgnoreConflicts.merge(&initial, &patches)
        );
    }

    #[test]
    fn reject_all_rejects_both_sides_of_a_conflict() {
        let (initial, patches) = conflicting_inputs();
        let outcome = MergePolicy::RejectAll.merge(&initial, &patches);
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].0, source("data"));
        assert_eq!(outcome.rejected[1].0, source("test-results"));
        for (_, patch) in &outcome.rejected {
            assert_eq!(patch.len(), 1);
            assert_eq!(patch.ops()[0].path().to_string(), "/name");
        }
    }

    #[test]
    fn reject_all_accepts_non_conflicting_ops() {
        let initial = doc(json!({"name": "Alice"}));
        let data_view = doc(json!({"name": "Alice", "age": "30"}));
        let tests_view = doc(json!({"name": "Alice", "city": "Berlin"}));
        let patches = vec![
            (source("data"), diff(&initial, &data_view)),
            (source("test-results"), diff(&initial, &tests_view)),
        ];
        let outcome = MergePolicy::RejectAll.merge(&initial, &patches);
        assert!(outcome.rejected.is_empty());
        let merged = crate::core::apply(&initial, &outcome.merged);
        assert_eq!(
            merged,
            doc(json!({"name": "Alice", "age": "30", "city": "Berlin"}))
        );
    }

    #[test]
    fn identical_inserts_do_not_conflict() {
        let initial = doc(json!({}));
        let view = doc(json!({"name": "Alice"}));
        let patches = vec![
            (source("data"), diff(&initial, &view)),
            (source("test-results"), diff(&initial, &view)),
        ];
        let outcome = MergePolicy::RejectAll.merge(&initial, &patches);
        assert!(outcome.rejected.is_empty());
        assert_eq!(crate::core::apply(&initial, &outcome.merged), view);
    }

    #[test]
    fn trust_only_rejects_everything_else() {
        let (initial, patches) = conflicting_inputs();
        let outcome = MergePolicy::TrustOnly(source("data")).merge(&initial, &patches);
        assert_eq!(crate::core::apply(&initial, &outcome.merged), doc(json!({"name": "Alicia"})));
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, source("test-results"));
    }

    #[test]
    fn merge_is_order_independent() {
        let (initial, mut patches) = conflicting_inputs();
        let forward = MergePolicy::IgnoreConflicts.merge(&initial, &patches);
        patches.reverse();
        let backward = MergePolicy::IgnoreConflicts.merge(&initial, &patches);
        assert_eq!(forward, backward);

        let forward = MergePolicy::RejectAll.merge(&initial, &patches);
        patches.reverse();
        let backward = MergePolicy::RejectAll.merge(&initial, &patches);
        assert_eq!(forward, backward);
    }
}
