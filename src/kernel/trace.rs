//! Per-round trace records.
//!
//! Tracing is a side channel: the reconciliation protocol behaves
//! identically whether or not a sink is attached. Sinks must be cheap and
//! non-blocking from the kernel's point of view.

use std::fmt;

use crossbeam::channel::Sender;
use uuid::Uuid;

use crate::core::{EntityName, InternalKey, SourceName};

/// What the round observed for one source during the fetch phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceStatus {
    /// Fetched a view.
    Ok,
    /// No foreign key has ever been recorded for this source.
    Unknown,
    /// A foreign key exists but the view could not be fetched this round.
    Absent { reason: String },
    /// The source answered with a document the core refused to decode.
    Error { reason: String },
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ok => f.write_str("ok"),
            SourceStatus::Unknown => f.write_str("unknown"),
            SourceStatus::Absent { reason } => write!(f, "absent ({reason})"),
            SourceStatus::Error { reason } => write!(f, "error ({reason})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Create => f.write_str("create"),
            RequestKind::Read => f.write_str("read"),
            RequestKind::Update => f.write_str("update"),
            RequestKind::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NoOp,
    RolledBack { reason: String },
}

/// One record per reconciliation round.
#[derive(Clone, Debug)]
pub struct RoundTrace {
    pub round_id: Uuid,
    pub request: RequestKind,
    pub entity: EntityName,
    pub ik: Option<InternalKey>,
    pub sources: Vec<(SourceName, SourceStatus)>,
    /// Scalar count of the ancestor document.
    pub initial_paths: usize,
    /// Operation count of the accepted merged patch.
    pub merged_ops: usize,
    /// Operation count per rejected patch, ascending source order.
    pub rejected_ops: Vec<(SourceName, usize)>,
    /// Propagation failures (source, reason); these do not abort rounds.
    pub write_failures: Vec<(SourceName, String)>,
    pub commit: CommitOutcome,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, trace: RoundTrace);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _trace: RoundTrace) {}
}

/// Emits each round through `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, trace: RoundTrace) {
        let sources: Vec<String> = trace
            .sources
            .iter()
            .map(|(source, status)| format!("{source}={status}"))
            .collect();
        tracing::debug!(
            round_id = %trace.round_id,
            request = %trace.request,
            entity = %trace.entity,
            ik = ?trace.ik,
            sources = ?sources,
            initial_paths = trace.initial_paths,
            merged_ops = trace.merged_ops,
            rejected = trace.rejected_ops.len(),
            write_failures = trace.write_failures.len(),
            commit = ?trace.commit,
            "reconciliation round"
        );
    }
}

/// Forwards records over a channel; used by tests to assert on rounds.
pub struct ChannelSink {
    sender: Sender<RoundTrace>,
}

impl ChannelSink {
    pub fn new(sender: Sender<RoundTrace>) -> Self {
        Self { sender }
    }
}

impl TraceSink for ChannelSink {
    fn record(&self, trace: RoundTrace) {
        // A disconnected receiver must never affect the round.
        let _ = self.sender.try_send(trace);
    }
}
