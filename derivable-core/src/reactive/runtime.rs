//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, derivations
//! and reactors. It owns the dependency graph and runs propagation passes.
//!
//! # How It Works
//!
//! 1. Every atom, derivation and reactor registers a node with the runtime.
//!
//! 2. When a derivation or reactor finishes evaluating, the runtime replaces
//!    its dependency edges with what the capture frame recorded.
//!
//! 3. When an atom changes, the runtime:
//!    a. Bumps the atom's version
//!    b. Marks every transitive dependent as maybe stale
//!    c. Queues the affected reactors in dependency order
//!    d. Runs the queue, unless a batch or transaction is open
//!
//! Derivations are never recomputed by the pass itself; a reactor pulls the
//! values it needs, and each derivation recomputes at most once.
//!
//! # Threading
//!
//! The runtime is thread-local and fully synchronous. Every node handle is
//! `!Send`, so a graph never crosses threads. All propagation for a mutation
//! has completed by the time the mutating call returns.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use super::options::InitialUntil;
use super::transaction::Snapshot;
use crate::error::ReactiveError;
use crate::graph::{Node, NodeId, StaleState, UpdateScheduler};

/// A node the runtime can bring up to date without knowing its value type.
pub trait Reactive {
    /// Derivations refresh their cached value; reactors re-evaluate and fire
    /// if their lifecycle allows it.
    fn update(&self);
}

/// Per-thread runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// How many times one reactor may evaluate within a single pass. Reached
    /// only when reactors keep re-triggering each other.
    pub max_reactions_per_pass: usize,

    /// How many reported errors are kept until [`Runtime::take_errors`] is
    /// called. The oldest are discarded first.
    pub max_queued_errors: usize,

    /// What a reactor does when its `until` already holds as it activates.
    /// Reactor options can override this per reactor.
    pub until_at_start: InitialUntil,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_reactions_per_pass: 100_000,
            max_queued_errors: 1024,
            until_at_start: InitialUntil::Suppress,
        }
    }
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

#[derive(Default)]
struct RuntimeState {
    scheduler: UpdateScheduler,

    /// Open batches and transactions. Reactors wait until this is zero.
    batch_depth: usize,

    /// Set while the pending queue is being drained.
    flushing: bool,

    /// One snapshot per open transaction, innermost last.
    snapshots: Vec<Snapshot>,

    /// Errors reported during passes, waiting to be taken.
    errors: VecDeque<ReactiveError>,

    config: RuntimeConfig,
}

/// Facade over the thread-local runtime.
///
/// Errors raised while reactors run are never returned to the code that made
/// the mutation. They are queued here and the host drains them with
/// [`Runtime::take_errors`]; only the newest
/// [`RuntimeConfig::max_queued_errors`] are kept.
pub struct Runtime;

impl Runtime {
    /// Run `f` with the runtime borrowed.
    ///
    /// `f` must not run user code or drop node handles: either may re-enter
    /// the runtime.
    fn with<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
    }

    /// Install settings for this thread.
    pub fn configure(config: RuntimeConfig) {
        Self::with(|rt| rt.config = config);
    }

    /// Settings in effect on this thread.
    pub fn config() -> RuntimeConfig {
        Self::with(|rt| rt.config)
    }

    pub(crate) fn register(node: Node) -> NodeId {
        Self::with(|rt| rt.scheduler.add_node(node))
    }

    pub(crate) fn register_reactor(node: Node, reactor: Rc<dyn Reactive>) -> NodeId {
        Self::with(|rt| rt.scheduler.add_reactor(node, reactor))
    }

    /// Remove a node whose owner is being dropped.
    pub(crate) fn unregister(id: NodeId) {
        let removed = RUNTIME
            .try_with(|rt| match rt.try_borrow_mut() {
                Ok(mut rt) => rt.scheduler.remove_node(id),
                Err(_) => {
                    warn!(node = %id, "runtime busy, node left in the graph");
                    None
                }
            })
            .ok()
            .flatten();
        drop(removed);
    }

    /// Remove a reactor and its edges.
    pub(crate) fn remove_reactor(id: NodeId) {
        let removed = Self::with(|rt| rt.scheduler.remove_node(id));
        // Dropping the evaluator may drop node handles it captured.
        drop(removed);
    }

    /// Current version of a node. Unregistered nodes (constants) are at 0.
    pub fn version(id: NodeId) -> u64 {
        Self::with(|rt| rt.scheduler.version(id).unwrap_or(0))
    }

    pub(crate) fn bump_version(id: NodeId) {
        Self::with(|rt| {
            if let Some(node) = rt.scheduler.get_node_mut(id) {
                node.bump_version();
            }
        });
    }

    pub(crate) fn stale_state(id: NodeId) -> StaleState {
        Self::with(|rt| rt.scheduler.stale_state(id))
    }

    pub(crate) fn mark_fresh(id: NodeId) {
        Self::with(|rt| {
            if let Some(node) = rt.scheduler.get_node_mut(id) {
                node.mark_fresh();
            }
        });
    }

    pub(crate) fn set_dependencies(id: NodeId, captured: &IndexSet<NodeId>) {
        Self::with(|rt| rt.scheduler.replace_dependencies(id, captured));
    }

    /// Whether any dependency of `id` moved past the version `id` observed.
    ///
    /// Derivation dependencies are refreshed first, in read order, so a
    /// dependency that recomputes to an equal value does not count. Stops at
    /// the first change: later dependencies may not be read at all on the
    /// next evaluation.
    pub(crate) fn dependencies_changed(id: NodeId) -> bool {
        let observed = Self::with(|rt| rt.scheduler.observed_versions(id));

        for (dep, seen) in observed {
            let hook = Self::with(|rt| rt.scheduler.hook(dep));
            if let Some(hook) = hook {
                hook.update();
            }

            if Self::with(|rt| rt.scheduler.version(dep)).is_some_and(|now| now != seen) {
                return true;
            }
        }
        false
    }

    /// Propagate a change to `id` and run the affected reactors.
    pub(crate) fn notify_changed(id: NodeId) {
        let marked = Self::with(|rt| rt.scheduler.mark_changed(id));
        trace!(node = %id, marked = marked.len(), "marked dependents stale");
        Self::flush();
    }

    pub(crate) fn begin_batch() {
        Self::with(|rt| rt.batch_depth += 1);
    }

    /// Close a batch. The outermost close runs the pending reactors.
    ///
    /// While unwinding no callbacks run; the queued reactors are dropped so
    /// they cannot fire during some later, unrelated mutation.
    pub(crate) fn end_batch() {
        let idle = Self::with(|rt| {
            rt.batch_depth = rt.batch_depth.saturating_sub(1);
            rt.batch_depth == 0
        });
        if !idle {
            return;
        }
        if std::thread::panicking() {
            let dropped = Self::with(|rt| rt.scheduler.clear_pending());
            debug!(dropped, "batch unwound, pending reactors dropped");
        } else {
            Self::flush();
        }
    }

    /// Run `f` with reactors held back until it returns.
    pub(crate) fn batch<R>(f: impl FnOnce() -> R) -> R {
        struct BatchGuard;

        impl Drop for BatchGuard {
            fn drop(&mut self) {
                Runtime::end_batch();
            }
        }

        Self::begin_batch();
        let _guard = BatchGuard;
        f()
    }

    /// Whether a batch or transaction is open on this thread.
    pub fn is_batching() -> bool {
        Self::with(|rt| rt.batch_depth > 0)
    }

    /// Drain the pending reactor queue.
    ///
    /// Mutations made by reactor callbacks mark and queue their own reactors;
    /// they are picked up by this same loop instead of starting a nested pass.
    /// A reactor that panics does not stop the others: the pass completes and
    /// the first panic is resumed afterwards.
    fn flush() {
        struct PassGuard;

        impl Drop for PassGuard {
            fn drop(&mut self) {
                let _ = RUNTIME.try_with(|rt| {
                    if let Ok(mut rt) = rt.try_borrow_mut() {
                        rt.flushing = false;
                    }
                });
            }
        }

        let start = Self::with(|rt| {
            if rt.batch_depth > 0 || rt.flushing {
                return false;
            }
            rt.flushing = true;
            true
        });
        if !start {
            return;
        }
        let pass = PassGuard;

        let limit = Self::with(|rt| rt.config.max_reactions_per_pass);
        let mut runs: HashMap<NodeId, usize> = HashMap::new();
        let mut reactions = 0usize;
        let mut panicked = None;

        loop {
            let next = Self::with(|rt| rt.scheduler.next_pending_reactor());
            let Some((id, reactor)) = next else {
                break;
            };

            let count = runs.entry(id).or_insert(0);
            *count += 1;
            if *count > limit {
                let dropped = Self::with(|rt| rt.scheduler.clear_pending());
                warn!(reactor = %id, limit, dropped, "propagation pass hit the reaction limit");
                Self::report(ReactiveError::PropagationLimit { limit });
                break;
            }

            reactions += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| reactor.update())) {
                warn!(reactor = %id, "reactor panicked during propagation pass");
                panicked.get_or_insert(payload);
            }
        }

        if reactions > 0 {
            trace!(reactions, "propagation pass complete");
        }

        drop(pass);
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }

    /// Queue an error raised during a pass.
    pub(crate) fn report(error: ReactiveError) {
        warn!(%error, "error during propagation pass");
        Self::with(|rt| {
            let cap = rt.config.max_queued_errors;
            if cap == 0 {
                return;
            }
            while rt.errors.len() >= cap {
                rt.errors.pop_front();
            }
            rt.errors.push_back(error);
        });
    }

    /// Take the errors reported by completed passes, oldest first.
    ///
    /// Reactor callback failures never abort a pass; they are collected here.
    pub fn take_errors() -> Vec<ReactiveError> {
        Self::with(|rt| std::mem::take(&mut rt.errors).into())
    }

    /// Number of registered atoms, derivations and reactors.
    pub fn node_count() -> usize {
        Self::with(|rt| rt.scheduler.node_count())
    }

    /// Number of reactors that have not stopped.
    pub fn reactor_count() -> usize {
        Self::with(|rt| rt.scheduler.reactor_count())
    }

    pub(crate) fn push_snapshot() {
        Self::with(|rt| rt.snapshots.push(Snapshot::default()));
    }

    pub(crate) fn pop_snapshot() -> Option<Snapshot> {
        Self::with(|rt| rt.snapshots.pop())
    }

    /// Fold a committed snapshot into the enclosing transaction's.
    ///
    /// Entries for atoms the parent already recorded are returned, to be
    /// dropped by the caller. Without a parent everything is returned.
    pub(crate) fn merge_snapshot(snapshot: Snapshot) -> Snapshot {
        Self::with(|rt| match rt.snapshots.last_mut() {
            Some(parent) => parent.absorb(snapshot),
            None => snapshot,
        })
    }

    /// Record how to restore `id` if the innermost transaction rolls back.
    ///
    /// Only the first mutation of each atom within a transaction is recorded;
    /// `make` runs outside the runtime borrow and only when needed.
    pub(crate) fn record_prior(id: NodeId, make: impl FnOnce() -> Box<dyn FnOnce()>) {
        let needed = Self::with(|rt| {
            rt.snapshots
                .last()
                .is_some_and(|snapshot| !snapshot.has_touched(id))
        });
        if !needed {
            return;
        }

        let restore = make();
        Self::with(|rt| {
            if let Some(snapshot) = rt.snapshots.last_mut() {
                snapshot.record(id, restore);
            }
        });
    }
}
