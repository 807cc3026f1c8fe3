//! Debounced reference resolution for one open document.
//!
//! # Responsibility
//! - Turn bursts of document edits into single scan -> lookup -> apply cycles.
//! - Replace resolved `[code]` tokens with reference nodes in one visible update.
//!
//! # Invariants
//! - At most one cycle is in flight per session; edits arriving mid-cycle
//!   re-arm the debounce after it finishes.
//! - A cycle whose session closed, or whose document was swapped out of the
//!   adapter, applies nothing.
//! - Splitting only ever looks at plain text leaves, so applying twice over an
//!   unchanged document is a no-op.

use crate::config::ResolverConfig;
use crate::model::ref_code::RefCode;
use crate::model::reference::ResolvedReference;
use crate::reference::cache::{ReferenceCache, Resolution};
use crate::reference::document::{
    DocumentAdapter, DocumentError, DocumentId, Inline, LeafEditor, ListenerId, NavigationHook,
    ReferenceNode,
};
use crate::reference::scanner::{find_code_spans, scan_codes};
use crate::store::EntityStore;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Phase of a resolution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Waiting for the quiet period to end at `deadline`.
    Scheduled { deadline: Instant },
    Resolving,
    Applying,
    Closed,
}

/// What the worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    Exit,
    Wait,
    SleepUntil(Instant),
    Run,
}

/// Pure debounce/phase bookkeeping, driven by explicit timestamps.
#[derive(Debug, Clone)]
pub struct PipelineMachine {
    state: PipelineState,
    debounce: Duration,
    change_pending: bool,
}

impl PipelineMachine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: PipelineState::Idle,
            debounce,
            change_pending: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Records a document change. Returns true when the worker must re-read
    /// its deadline.
    pub fn on_change(&mut self, now: Instant) -> bool {
        match self.state {
            PipelineState::Idle | PipelineState::Scheduled { .. } => {
                self.state = PipelineState::Scheduled {
                    deadline: now + self.debounce,
                };
                true
            }
            PipelineState::Resolving | PipelineState::Applying => {
                self.change_pending = true;
                false
            }
            PipelineState::Closed => false,
        }
    }

    /// Schedules a cycle with no quiet period.
    pub fn force(&mut self, now: Instant) -> bool {
        match self.state {
            PipelineState::Idle | PipelineState::Scheduled { .. } => {
                self.state = PipelineState::Scheduled { deadline: now };
                true
            }
            PipelineState::Resolving | PipelineState::Applying => {
                self.change_pending = true;
                false
            }
            PipelineState::Closed => false,
        }
    }

    /// Advances `Scheduled` to `Resolving` once the deadline has passed.
    pub fn next_step(&mut self, now: Instant) -> WorkerStep {
        match self.state {
            PipelineState::Closed => WorkerStep::Exit,
            PipelineState::Scheduled { deadline } if now >= deadline => {
                self.state = PipelineState::Resolving;
                self.change_pending = false;
                WorkerStep::Run
            }
            PipelineState::Scheduled { deadline } => WorkerStep::SleepUntil(deadline),
            PipelineState::Idle | PipelineState::Resolving | PipelineState::Applying => {
                WorkerStep::Wait
            }
        }
    }

    /// `Resolving` -> `Applying`; false when the session closed meanwhile.
    pub fn begin_apply(&mut self) -> bool {
        match self.state {
            PipelineState::Resolving => {
                self.state = PipelineState::Applying;
                true
            }
            _ => false,
        }
    }

    /// Ends a cycle: back to `Idle`, or straight to `Scheduled` if edits
    /// arrived while it ran.
    pub fn finish(&mut self, now: Instant) {
        if self.state == PipelineState::Closed {
            return;
        }
        self.state = if std::mem::take(&mut self.change_pending) {
            PipelineState::Scheduled {
                deadline: now + self.debounce,
            }
        } else {
            PipelineState::Idle
        };
    }

    pub fn close(&mut self) {
        self.state = PipelineState::Closed;
        self.change_pending = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state == PipelineState::Closed
    }
}

/// Counters reported by `ResolutionSession::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Cycles that reached the end of `Applying`.
    pub cycles: u64,
    /// Reference nodes inserted.
    pub splits: u64,
    /// Store lookups issued through the cache.
    pub lookups: u64,
}

/// Splits one text leaf around every resolvable `[code]`, left to right.
///
/// Returns `None` when nothing in `text` resolves. Empty text pieces are
/// omitted.
pub fn split_text_leaf<F>(
    text: &str,
    resolve: F,
    navigate: &NavigationHook,
) -> Option<(Vec<Inline>, usize)>
where
    F: Fn(&RefCode) -> Option<ResolvedReference>,
{
    let mut pieces = Vec::new();
    let mut rest = text;
    let mut splits = 0;

    while let Some((range, reference)) = find_code_spans(rest)
        .into_iter()
        .find_map(|span| resolve(&span.code).map(|reference| (span.range, reference)))
    {
        if range.start > 0 {
            pieces.push(Inline::Text(rest[..range.start].to_string()));
        }
        pieces.push(Inline::Reference(ReferenceNode::new(
            reference,
            navigate.clone(),
        )));
        rest = &rest[range.end..];
        splits += 1;
    }

    if splits == 0 {
        return None;
    }
    if !rest.is_empty() {
        pieces.push(Inline::Text(rest.to_string()));
    }
    Some((pieces, splits))
}

struct SessionShared<S: EntityStore, D: DocumentAdapter> {
    machine: Mutex<PipelineMachine>,
    wake: Notify,
    idle: Notify,
    cache: ReferenceCache<S>,
    document: Arc<D>,
    document_id: DocumentId,
    navigate: NavigationHook,
    cycles: AtomicU64,
    splits: AtomicU64,
}

impl<S, D> SessionShared<S, D>
where
    S: EntityStore + 'static,
    D: DocumentAdapter + 'static,
{
    fn notify_change(&self) {
        let wake = self.machine.lock().on_change(Instant::now());
        if wake {
            self.wake.notify_one();
        }
    }

    async fn run_cycle(&self) {
        if self.document.document_id() != self.document_id {
            debug!(
                "event=ref_cycle module=reference status=dropped document_id={} reason=document_swapped",
                self.document_id
            );
            self.machine.lock().finish(Instant::now());
            self.idle.notify_waiters();
            return;
        }

        let text = self.document.flattened_text();
        let unknown: Vec<RefCode> = scan_codes(&text)
            .into_iter()
            .filter(|code| !self.cache.is_known(code))
            .collect();
        if !unknown.is_empty() {
            let outcomes = self.cache.resolve_batch(&unknown).await;
            let found = outcomes
                .iter()
                .filter(|(_, resolution)| matches!(resolution, Resolution::Found(_)))
                .count();
            debug!(
                "event=ref_batch module=reference status=ok document_id={} codes={} found={found}",
                self.document_id,
                unknown.len()
            );
        }

        let proceed = self.machine.lock().begin_apply();
        if !proceed {
            debug!(
                "event=ref_cycle module=reference status=dropped document_id={} reason=closed",
                self.document_id
            );
            self.idle.notify_waiters();
            return;
        }

        match self.apply() {
            Ok(splits) => {
                self.splits.fetch_add(splits as u64, Ordering::Relaxed);
                self.cycles.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "event=ref_cycle module=reference status=ok document_id={} splits={splits}",
                    self.document_id
                );
            }
            Err(err) => {
                warn!(
                    "event=ref_cycle module=reference status=error document_id={} error={err}",
                    self.document_id
                );
            }
        }

        self.machine.lock().finish(Instant::now());
        self.idle.notify_waiters();
    }

    fn apply(&self) -> Result<usize, DocumentError> {
        let mut applied = 0;
        let result = self.document.transact(&mut |editor: &mut dyn LeafEditor| {
            applied = 0;
            if self.machine.lock().is_closed() {
                return Ok(());
            }
            if editor.document_id() != self.document_id {
                debug!(
                    "event=ref_cycle module=reference status=dropped document_id={} reason=document_swapped",
                    self.document_id
                );
                return Ok(());
            }

            let mut leaves = editor.text_leaves();
            leaves.sort_by(|a, b| b.0.cmp(&a.0));
            for (leaf, text) in leaves {
                let split = split_text_leaf(
                    &text,
                    |code| self.cache.last_found(code),
                    &self.navigate,
                );
                if let Some((pieces, count)) = split {
                    editor.replace_leaf(leaf, pieces)?;
                    applied += count;
                }
            }
            Ok(())
        });
        result.map(|()| applied)
    }
}

async fn run_worker<S, D>(shared: Arc<SessionShared<S, D>>)
where
    S: EntityStore + 'static,
    D: DocumentAdapter + 'static,
{
    loop {
        let step = shared.machine.lock().next_step(Instant::now());
        match step {
            WorkerStep::Exit => break,
            WorkerStep::Wait => shared.wake.notified().await,
            WorkerStep::SleepUntil(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.wake.notified() => {}
                }
            }
            WorkerStep::Run => shared.run_cycle().await,
        }
    }
    debug!(
        "event=ref_worker_exit module=reference status=ok document_id={}",
        shared.document_id
    );
}

/// Live resolution session bound to one document adapter.
///
/// Dropping the session closes it.
pub struct ResolutionSession<S, D>
where
    S: EntityStore + 'static,
    D: DocumentAdapter + 'static,
{
    shared: Arc<SessionShared<S, D>>,
    listener: ListenerId,
    worker: JoinHandle<()>,
}

impl<S, D> ResolutionSession<S, D>
where
    S: EntityStore + 'static,
    D: DocumentAdapter + 'static,
{
    /// Subscribes to `document` and starts the session worker.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn open(
        store: Arc<S>,
        document: Arc<D>,
        navigate: NavigationHook,
        config: &ResolverConfig,
    ) -> Self {
        let document_id = document.document_id();
        let shared = Arc::new(SessionShared {
            machine: Mutex::new(PipelineMachine::new(config.debounce())),
            wake: Notify::new(),
            idle: Notify::new(),
            cache: ReferenceCache::with_positive_ttl(store, config.positive_ttl()),
            document: document.clone(),
            document_id,
            navigate,
            cycles: AtomicU64::new(0),
            splits: AtomicU64::new(0),
        });

        let weak: Weak<SessionShared<S, D>> = Arc::downgrade(&shared);
        let listener = document.on_change(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.notify_change();
            }
        }));
        let worker = tokio::spawn(run_worker(shared.clone()));

        info!(
            "event=ref_session_open module=reference status=ok document_id={document_id} debounce_ms={}",
            config.debounce_ms
        );
        Self {
            shared,
            listener,
            worker,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.shared.document_id
    }

    pub fn state(&self) -> PipelineState {
        self.shared.machine.lock().state()
    }

    pub fn cache(&self) -> &ReferenceCache<S> {
        &self.shared.cache
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            cycles: self.shared.cycles.load(Ordering::Relaxed),
            splits: self.shared.splits.load(Ordering::Relaxed),
            lookups: self.shared.cache.lookups_issued(),
        }
    }

    /// Same as an editor change notification.
    pub fn notify_change(&self) {
        self.shared.notify_change();
    }

    /// Runs one cycle without waiting for the quiet period and returns once
    /// the session is idle again.
    pub async fn resolve_now(&self) {
        let wake = self.shared.machine.lock().force(Instant::now());
        if wake {
            self.shared.wake.notify_one();
        }
        self.wait_idle().await;
    }

    /// Resolves when the session is `Idle` or `Closed`.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if matches!(self.state(), PipelineState::Idle | PipelineState::Closed) {
                return;
            }
            notified.await;
        }
    }

    /// Cancels pending work and unsubscribes from the document.
    pub fn close(&self) {
        let already_closed = {
            let mut machine = self.shared.machine.lock();
            let closed = machine.is_closed();
            machine.close();
            closed
        };
        if already_closed {
            return;
        }
        self.shared.document.remove_listener(self.listener);
        self.shared.wake.notify_one();
        self.shared.idle.notify_waiters();
        info!(
            "event=ref_session_close module=reference status=ok document_id={}",
            self.shared.document_id
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.machine.lock().is_closed()
    }
}

impl<S, D> Drop for ResolutionSession<S, D>
where
    S: EntityStore + 'static,
    D: DocumentAdapter + 'static,
{
    fn drop(&mut self) {
        self.close();
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::{split_text_leaf, PipelineMachine, PipelineState, WorkerStep};
    use crate::model::note::NoteFormat;
    use crate::model::ref_code::RefCode;
    use crate::model::reference::{ReferenceKind, ReferenceTarget, ResolvedReference};
    use crate::reference::document::{Inline, NavigationHook, OpenMode};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;
    use uuid::Uuid;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn reference(code: &str, title: &str) -> ResolvedReference {
        ResolvedReference {
            code: RefCode::parse(code).expect("valid test code"),
            title: title.to_string(),
            target: ReferenceTarget::Note {
                note_id: Uuid::new_v4(),
                format: NoteFormat::Document,
                starred: false,
            },
        }
    }

    fn noop_hook() -> NavigationHook {
        Arc::new(|_: &RefCode, _: ReferenceKind, _: OpenMode| {})
    }

    #[test]
    fn changes_rearm_the_deadline() {
        let t0 = Instant::now();
        let mut machine = PipelineMachine::new(DEBOUNCE);
        assert_eq!(machine.next_step(t0), WorkerStep::Wait);

        assert!(machine.on_change(t0));
        assert!(machine.on_change(t0 + Duration::from_millis(300)));
        let deadline = t0 + Duration::from_millis(800);
        assert_eq!(machine.state(), PipelineState::Scheduled { deadline });
        assert_eq!(
            machine.next_step(t0 + Duration::from_millis(500)),
            WorkerStep::SleepUntil(deadline)
        );
        assert_eq!(machine.next_step(deadline), WorkerStep::Run);
        assert_eq!(machine.state(), PipelineState::Resolving);
    }

    #[test]
    fn change_mid_cycle_reschedules_after_finish() {
        let t0 = Instant::now();
        let mut machine = PipelineMachine::new(DEBOUNCE);
        machine.on_change(t0);
        machine.next_step(t0 + DEBOUNCE);

        assert!(!machine.on_change(t0 + DEBOUNCE));
        assert!(machine.begin_apply());
        assert_eq!(machine.state(), PipelineState::Applying);

        let done = t0 + Duration::from_millis(600);
        machine.finish(done);
        assert_eq!(
            machine.state(),
            PipelineState::Scheduled {
                deadline: done + DEBOUNCE
            }
        );
    }

    #[test]
    fn finish_without_changes_goes_idle() {
        let t0 = Instant::now();
        let mut machine = PipelineMachine::new(DEBOUNCE);
        machine.force(t0);
        assert_eq!(machine.next_step(t0), WorkerStep::Run);
        assert!(machine.begin_apply());
        machine.finish(t0);
        assert_eq!(machine.state(), PipelineState::Idle);
    }

    #[test]
    fn close_mid_cycle_blocks_apply() {
        let t0 = Instant::now();
        let mut machine = PipelineMachine::new(DEBOUNCE);
        machine.force(t0);
        machine.next_step(t0);
        machine.close();

        assert!(!machine.begin_apply());
        machine.finish(t0);
        assert!(machine.is_closed());
        assert!(!machine.on_change(t0));
        assert_eq!(machine.next_step(t0), WorkerStep::Exit);
    }

    #[test]
    fn split_produces_prefix_node_suffix() {
        let plan = reference("a1bcde", "Plan");
        let (pieces, splits) = split_text_leaf(
            "see [a1bcde] for details",
            |code| (code.as_str() == "a1bcde").then(|| plan.clone()),
            &noop_hook(),
        )
        .expect("code should resolve");

        assert_eq!(splits, 1);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], Inline::Text("see ".to_string()));
        match &pieces[1] {
            Inline::Reference(node) => assert_eq!(node.title(), "Plan"),
            other => panic!("expected reference node, got {other:?}"),
        }
        assert_eq!(pieces[2], Inline::Text(" for details".to_string()));
    }

    #[test]
    fn split_handles_multiple_codes_and_skips_unresolved() {
        let a = reference("a1bcde", "A");
        let b = reference("b2cdef", "B");
        let (pieces, splits) = split_text_leaf(
            "[a1bcde] x [z9zzzz] [b2cdef]",
            |code| match code.as_str() {
                "a1bcde" => Some(a.clone()),
                "b2cdef" => Some(b.clone()),
                _ => None,
            },
            &noop_hook(),
        )
        .expect("codes should resolve");

        assert_eq!(splits, 2);
        assert_eq!(pieces.len(), 3);
        assert!(matches!(&pieces[0], Inline::Reference(node) if node.title() == "A"));
        assert_eq!(pieces[1], Inline::Text(" x [z9zzzz] ".to_string()));
        assert!(matches!(&pieces[2], Inline::Reference(node) if node.title() == "B"));
    }

    #[test]
    fn split_returns_none_when_nothing_resolves() {
        assert!(split_text_leaf("[z9zzzz] only", |_| None, &noop_hook()).is_none());
    }
}
