//! The reconciliation kernel: one request in, one round of the
//! synchronization protocol out.
//!
//! Everything stateful is threaded through [`Context`]: the registry of
//! configured entities, the store, the adaptor set, the trace sink and the
//! retry policy. Diff, patch and merge stay pure; the only suspension
//! points are the store transaction, adaptor calls and the final commit.

pub mod trace;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use uuid::Uuid;

use crate::config::{Config, EntityRuntime, Registry};
use crate::core::{
    Document, EntityName, ForeignKey, InternalKey, Patch, SourceName, apply, diff,
    initial_document,
};
use crate::source::{CommandSource, DataSource, DataSourceError};
use crate::store::{Store, StoreTxn};
use crate::{Error, Result};

use self::trace::{CommitOutcome, NullSink, RequestKind, RoundTrace, SourceStatus, TraceSink};

/// One reconciliation request. `Read` is a side-effect-free probe; the
/// other three execute the full protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Create(ForeignKey),
    Read(ForeignKey),
    Update(ForeignKey),
    Delete(ForeignKey),
}

impl Request {
    pub fn fk(&self) -> &ForeignKey {
        match self {
            Request::Create(fk) | Request::Read(fk) | Request::Update(fk) | Request::Delete(fk) => {
                fk
            }
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Create(_) => RequestKind::Create,
            Request::Read(_) => RequestKind::Read,
            Request::Update(_) => RequestKind::Update,
            Request::Delete(_) => RequestKind::Delete,
        }
    }
}

/// Bounded retry of whole rounds after transient store errors.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(crate::config::DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Everything a round needs, threaded explicitly.
pub struct Context {
    registry: Registry,
    store: Arc<dyn Store>,
    sources: BTreeMap<(EntityName, SourceName), Arc<dyn DataSource>>,
    trace: Arc<dyn TraceSink>,
    retry: RetryPolicy,
}

impl Context {
    pub fn new(registry: Registry, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            sources: BTreeMap::new(),
            trace: Arc::new(NullSink),
            retry: RetryPolicy::default(),
        }
    }

    /// Build a context whose adaptors are the configured subprocess
    /// commands.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let registry = Registry::from_config(config)?;
        let mut sources: BTreeMap<(EntityName, SourceName), Arc<dyn DataSource>> = BTreeMap::new();
        for entity in registry.entities() {
            for (source, templates) in &entity.sources {
                sources.insert(
                    (entity.name.clone(), source.clone()),
                    Arc::new(CommandSource::new(
                        entity.name.clone(),
                        source.clone(),
                        templates.clone(),
                    )),
                );
            }
        }
        let mut context = Self::new(registry, store);
        context.sources = sources;
        context.retry = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            initial_backoff: Duration::from_millis(config.retry.backoff_ms),
        };
        Ok(context)
    }

    pub fn with_source(
        mut self,
        entity: EntityName,
        source: SourceName,
        adaptor: Arc<dyn DataSource>,
    ) -> Self {
        self.sources.insert((entity, source), adaptor);
        self
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = sink;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn adaptor(&self, entity: &EntityName, source: &SourceName) -> Option<Arc<dyn DataSource>> {
        self.sources.get(&(entity.clone(), source.clone())).cloned()
    }
}

/// What a request produced.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Delete of a foreign key nobody has ever seen.
    NoOp,
    Reconciled(RoundSummary),
    /// Views fetched by a `Read` probe, ascending source order.
    Probed(Vec<(SourceName, std::result::Result<Document, String>)>),
}

#[derive(Clone, Debug)]
pub struct RoundSummary {
    pub round_id: Uuid,
    pub ik: InternalKey,
    /// The agreed document after this round; empty when the entity was
    /// deleted.
    pub new_initial: Document,
    pub sources: Vec<(SourceName, SourceStatus)>,
    pub rejected_sources: Vec<SourceName>,
    /// True when the round destroyed the internal key.
    pub deleted: bool,
}

/// Handle one request end-to-end, retrying whole rounds on transient store
/// errors with bounded exponential backoff.
pub fn run(ctx: &Context, request: &Request) -> Result<Outcome> {
    let entity = ctx.registry.resolve(request.fk())?.clone();

    if let Request::Read(fk) = request {
        return probe(ctx, &entity, fk);
    }

    let mut attempt = 0u32;
    loop {
        match execute_round(ctx, &entity, request) {
            Err(err) if err.transience().is_retryable() && attempt + 1 < ctx.retry.max_attempts => {
                let backoff = ctx.retry.backoff(attempt);
                tracing::warn!(
                    request = %request.kind(),
                    fk = %request.fk(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient store error, retrying round: {err}"
                );
                std::thread::sleep(backoff);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Fetch-phase result for one source.
enum Fetched {
    View(Document),
    Unknown,
    Absent(String),
    Error(String),
}

impl Fetched {
    fn status(&self) -> SourceStatus {
        match self {
            Fetched::View(_) => SourceStatus::Ok,
            Fetched::Unknown => SourceStatus::Unknown,
            Fetched::Absent(reason) => SourceStatus::Absent {
                reason: reason.clone(),
            },
            Fetched::Error(reason) => SourceStatus::Error {
                reason: reason.clone(),
            },
        }
    }
}

fn execute_round(ctx: &Context, entity: &EntityRuntime, request: &Request) -> Result<Outcome> {
    let round_id = Uuid::new_v4();
    let request_fk = request.fk();
    let span = tracing::debug_span!(
        "round",
        %round_id,
        request = %request.kind(),
        fk = %request_fk
    );
    let _guard = span.enter();

    // Step 1: resolve or allocate inside the store transaction, which
    // serializes concurrent rounds for the same key.
    let mut txn = ctx.store.writer().begin()?;
    let ik = match txn.resolve_internal_key(request_fk)? {
        Some(ik) => ik,
        None => match request {
            Request::Delete(_) => {
                txn.commit()?;
                emit(
                    ctx,
                    round_trace(round_id, request, &entity.name, None, CommitOutcome::NoOp),
                );
                return Ok(Outcome::NoOp);
            }
            _ => {
                let ik = txn.allocate_internal_key(&entity.name)?;
                txn.record_foreign_key(&ik, request_fk)?;
                tracing::debug!(%ik, "allocated internal key");
                ik
            }
        },
    };

    // Step 2: fetch every enabled source's view in parallel.
    let bound = txn.lookup_foreign_keys(&ik)?;
    let fetched = fetch_views(ctx, entity, &bound);

    // Step 3: ancestor for the three-way merge.
    let initial = match txn.read_initial_document(&ik)? {
        Some(doc) => doc,
        None => {
            let views: Vec<Document> = fetched
                .values()
                .filter_map(|fetched| match fetched {
                    Fetched::View(doc) => Some(doc.clone()),
                    _ => None,
                })
                .collect();
            initial_document(&views)
        }
    };

    // Steps 4-6: per-source diffs, merge, new agreed document. A delete
    // request bypasses the policy and forces the merged patch to clear the
    // ancestor.
    let (merged, rejected) = if matches!(request, Request::Delete(_)) {
        (diff(&initial, &Document::empty()), Vec::new())
    } else {
        let patches: Vec<(SourceName, Patch)> = fetched
            .iter()
            .filter_map(|(source, fetched)| match fetched {
                Fetched::View(view) => Some((source.clone(), diff(&initial, view))),
                _ => None,
            })
            .collect();
        let outcome = entity.policy.merge(&initial, &patches);
        (outcome.merged, outcome.rejected)
    };
    let new_initial = apply(&initial, &merged);

    // Step 7: propagate. Adaptor failures never abort the round; the new
    // initial still commits so later rounds converge.
    let mut write_failures: Vec<(SourceName, String)> = Vec::new();
    for (source, fetched_view) in &fetched {
        let Some(adaptor) = ctx.adaptor(&entity.name, source) else {
            write_failures.push((source.clone(), "no adaptor registered".into()));
            continue;
        };
        // A source that failed to answer reads this round is not written
        // to either; convergence is retried next round.
        if matches!(fetched_view, Fetched::Absent(_) | Fetched::Error(_)) {
            continue;
        }
        let result = propagate(
            &mut *txn,
            adaptor,
            entity.timeout,
            &ik,
            source,
            bound.get(source),
            fetched_view,
            &merged,
            &new_initial,
        );
        if let Err(reason) = result {
            tracing::warn!(%source, "propagation failed: {reason}");
            write_failures.push((source.clone(), reason));
        }
    }

    // Step 8: persist and commit.
    let remaining = txn.lookup_foreign_keys(&ik)?;
    let deleted = new_initial.is_empty() && remaining.is_empty();
    if deleted {
        txn.delete_internal_key(&ik)?;
    } else if new_initial.is_empty() {
        // Sources remain to be deleted on later rounds; no agreed document
        // until they are.
        txn.delete_initial_document(&ik)?;
    } else {
        txn.write_initial_document(&ik, &new_initial)?;
    }
    for (source, patch) in &rejected {
        let reason = format!("rejected by merge policy `{}`", entity.policy);
        txn.record_rejected_patch(&ik, source, patch, &reason)?;
    }

    let statuses: Vec<(SourceName, SourceStatus)> = fetched
        .iter()
        .map(|(source, fetched)| (source.clone(), fetched.status()))
        .collect();
    let commit = match txn.commit() {
        Ok(()) => CommitOutcome::Committed,
        Err(err) => {
            let outcome = CommitOutcome::RolledBack {
                reason: err.to_string(),
            };
            let mut trace = round_trace(round_id, request, &entity.name, Some(&ik), outcome);
            trace.sources = statuses;
            trace.write_failures = write_failures;
            emit(ctx, trace);
            return Err(err.into());
        }
    };

    let mut trace = round_trace(round_id, request, &entity.name, Some(&ik), commit);
    trace.sources = statuses.clone();
    trace.initial_paths = initial.paths().len();
    trace.merged_ops = merged.len();
    trace.rejected_ops = rejected
        .iter()
        .map(|(source, patch)| (source.clone(), patch.len()))
        .collect();
    trace.write_failures = write_failures;
    emit(ctx, trace);

    Ok(Outcome::Reconciled(RoundSummary {
        round_id,
        ik,
        new_initial,
        sources: statuses,
        rejected_sources: rejected.into_iter().map(|(source, _)| source).collect(),
        deleted,
    }))
}

/// Write one source's share of the merged result, updating the foreign-key
/// bookkeeping inside the open transaction.
///
/// The update payload is the source's own view with the accepted patch
/// applied, not the agreed document itself: the two differ exactly at the
/// paths whose operations the policy rejected, and a rejected change stays
/// in its source rather than being clobbered.
#[allow(clippy::too_many_arguments)]
fn propagate(
    txn: &mut dyn StoreTxn,
    adaptor: Arc<dyn DataSource>,
    timeout: Duration,
    ik: &InternalKey,
    source: &SourceName,
    bound_fk: Option<&ForeignKey>,
    fetched: &Fetched,
    merged: &Patch,
    new_initial: &Document,
) -> std::result::Result<(), String> {
    match bound_fk {
        // Nothing recorded and nothing to write.
        None if new_initial.is_empty() => Ok(()),
        // New source: create a record and remember its key.
        None => {
            let doc = new_initial.clone();
            let created = call_with_deadline(timeout, {
                let adaptor = Arc::clone(&adaptor);
                move || adaptor.create(&doc)
            })
            .map_err(|err| err.to_string())?;
            txn.record_foreign_key(ik, &created)
                .map_err(|err| err.to_string())
        }
        // The merged result deletes the entity from this source.
        Some(fk) if new_initial.is_empty() => {
            let target = fk.clone();
            let result = call_with_deadline(timeout, {
                let adaptor = Arc::clone(&adaptor);
                move || adaptor.delete(&target)
            });
            match result {
                // Gone already means the delete is complete.
                Ok(()) | Err(DataSourceError::Gone { .. }) => {
                    txn.delete_foreign_key(fk).map_err(|err| err.to_string())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        // Steady state: push the accepted changes onto the source's view.
        Some(fk) => {
            let Fetched::View(view) = fetched else {
                return Ok(());
            };
            let target_doc = apply(view, merged);
            if target_doc == *view {
                return Ok(());
            }
            let target = fk.clone();
            let returned = call_with_deadline(timeout, {
                let adaptor = Arc::clone(&adaptor);
                move || adaptor.update(&target, &target_doc)
            })
            .map_err(|err| err.to_string())?;
            if returned != *fk {
                tracing::debug!(%source, old = %fk, new = %returned, "source moved foreign key");
                txn.record_foreign_key(ik, &returned)
                    .map_err(|err| err.to_string())?;
            }
            Ok(())
        }
    }
}

/// Fetch all bound views in parallel; every enabled source gets an entry.
/// Sources past their deadline are absent for this round.
fn fetch_views(
    ctx: &Context,
    entity: &EntityRuntime,
    bound: &BTreeMap<SourceName, ForeignKey>,
) -> BTreeMap<SourceName, Fetched> {
    let mut out: BTreeMap<SourceName, Fetched> = BTreeMap::new();
    let (sender, receiver) = channel::unbounded();
    let mut in_flight = 0usize;

    for source in entity.sources.keys() {
        let Some(fk) = bound.get(source) else {
            out.insert(source.clone(), Fetched::Unknown);
            continue;
        };
        let Some(adaptor) = ctx.adaptor(&entity.name, source) else {
            out.insert(
                source.clone(),
                Fetched::Absent("no adaptor registered".into()),
            );
            continue;
        };
        let sender = sender.clone();
        let source = source.clone();
        let fk = fk.clone();
        in_flight += 1;
        std::thread::spawn(move || {
            let result = adaptor.read(&fk);
            let _ = sender.send((source, result));
        });
    }
    drop(sender);

    let deadline = Instant::now() + entity.timeout;
    while in_flight > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok((source, Ok(view))) => {
                out.insert(source, Fetched::View(view));
                in_flight -= 1;
            }
            Ok((source, Err(err))) => {
                let fetched = match &err {
                    DataSourceError::Malformed(_) => Fetched::Error(err.to_string()),
                    _ => Fetched::Absent(err.to_string()),
                };
                out.insert(source, fetched);
                in_flight -= 1;
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Anything still missing ran over the deadline; its worker thread is
    // left to finish on its own (at-least-once towards sources).
    for source in entity.sources.keys() {
        out.entry(source.clone())
            .or_insert_with(|| Fetched::Absent("deadline exceeded".into()));
    }
    out
}

/// Run one adaptor call on a worker thread with a deadline. On timeout the
/// call keeps running detached and the source counts as unavailable.
fn call_with_deadline<T: Send + 'static>(
    timeout: Duration,
    call: impl FnOnce() -> std::result::Result<T, DataSourceError> + Send + 'static,
) -> std::result::Result<T, DataSourceError> {
    let (sender, receiver) = channel::bounded(1);
    std::thread::spawn(move || {
        let _ = sender.send(call());
    });
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(DataSourceError::Unavailable {
            reason: format!("deadline of {}ms exceeded", timeout.as_millis()),
        }),
    }
}

/// Side-effect-free probe: fetch current views without opening a write
/// transaction or touching any source.
fn probe(ctx: &Context, entity: &EntityRuntime, fk: &ForeignKey) -> Result<Outcome> {
    let reader = ctx.store.reader();
    let views = match reader.resolve_internal_key(fk)? {
        Some(ik) => {
            let bound = reader.lookup_foreign_keys(&ik)?;
            let fetched = fetch_views(ctx, entity, &bound);
            fetched
                .into_iter()
                .map(|(source, fetched)| {
                    let view = match fetched {
                        Fetched::View(doc) => Ok(doc),
                        other => Err(other.status().to_string()),
                    };
                    (source, view)
                })
                .collect()
        }
        None => {
            // Unknown to the kernel; ask the requested source directly.
            let adaptor =
                ctx.adaptor(&entity.name, &fk.source)
                    .ok_or_else(|| InternalErrorNoAdaptor {
                        entity: entity.name.clone(),
                        source: fk.source.clone(),
                    })?;
            let target = fk.clone();
            let view = call_with_deadline(entity.timeout, {
                let adaptor = Arc::clone(&adaptor);
                move || adaptor.read(&target)
            })
            .map_err(|err| err.to_string());
            vec![(fk.source.clone(), view)]
        }
    };
    Ok(Outcome::Probed(views))
}

struct InternalErrorNoAdaptor {
    entity: EntityName,
    source: SourceName,
}

impl From<InternalErrorNoAdaptor> for Error {
    fn from(err: InternalErrorNoAdaptor) -> Self {
        Error::Internal(crate::error::InternalError::new(format!(
            "no adaptor registered for {}/{}",
            err.entity, err.source
        )))
    }
}

fn round_trace(
    round_id: Uuid,
    request: &Request,
    entity: &EntityName,
    ik: Option<&InternalKey>,
    commit: CommitOutcome,
) -> RoundTrace {
    RoundTrace {
        round_id,
        request: request.kind(),
        entity: entity.clone(),
        ik: ik.cloned(),
        sources: Vec::new(),
        initial_paths: 0,
        merged_ops: 0,
        rejected_ops: Vec::new(),
        write_failures: Vec::new(),
        commit,
    }
}

fn emit(ctx: &Context, trace: RoundTrace) {
    ctx.trace.record(trace);
}
