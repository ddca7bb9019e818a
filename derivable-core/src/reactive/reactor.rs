//! Reactor Implementation
//!
//! A reactor observes one node and runs a side-effecting callback with its
//! value: once when it activates, then every time the value changes.
//!
//! # How Reactors Work
//!
//! 1. On creation the reactor evaluates immediately. Without a `from`
//!    condition it activates and fires with the current value.
//!
//! 2. Everything read during an evaluation (the observed node and whatever
//!    the lifecycle conditions read) becomes the reactor's dependency set.
//!
//! 3. When one of those dependencies changes, the runtime queues the reactor
//!    and re-evaluates it once the marking phase is complete.
//!
//! 4. The callback runs outside dependency tracking. It may set atoms; those
//!    changes are propagated within the same pass.
//!
//! # Lifecycle
//!
//! `Pending` → `Active` → `Stopped`. A pending reactor only watches its
//! `from` condition. `until` wins over a fire caused by the same change, and
//! `once` stops the reactor right after its first fire. `Stopped` is terminal:
//! the reactor leaves the graph and releases everything it captured.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::context::ReactiveContext;
use super::derivable::Derivable;
use super::options::{Condition, InitialUntil, ReactorOptions};
use super::runtime::{Reactive, Runtime};
use super::state::{Equality, State};
use crate::error::{CapturedError, ReactiveError};
use crate::graph::{Node, NodeId, NodeKind, StaleState};

/// Where a reactor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReactorStatus {
    /// Waiting for its `from` condition.
    Pending,

    /// Receiving changes.
    Active,

    /// Stopped for good.
    Stopped,
}

type Callback<T> = Box<dyn FnMut(&T) -> Result<(), CapturedError>>;

struct ReactorInner<T> {
    id: NodeId,

    status: Rc<Cell<ReactorStatus>>,

    /// Reads the observed node.
    source: Box<dyn Fn() -> State<T>>,

    equality: Equality<T>,

    options: ReactorOptions<T>,

    /// The value passed to the callback most recently.
    last_fired: RefCell<Option<T>>,

    callback: RefCell<Callback<T>>,
}

impl<T> ReactorInner<T>
where
    T: Clone + 'static,
{
    fn is_stopped(&self) -> bool {
        self.status.get() == ReactorStatus::Stopped
    }

    /// Evaluate the lifecycle conditions and fire if they allow it.
    ///
    /// `initial` is set only for the evaluation made at creation.
    fn evaluate(&self, initial: bool) {
        if self.is_stopped() {
            return;
        }

        let ctx = ReactiveContext::enter(self.id);
        let mut observed = None;
        let activating = self.status.get() == ReactorStatus::Pending;

        if activating {
            if let Some(from) = &self.options.from {
                if !self.holds(from, &mut observed) {
                    let dependencies = ctx.finish();
                    Runtime::set_dependencies(self.id, &dependencies);
                    Runtime::mark_fresh(self.id);
                    return;
                }
            }
        }

        let until = self
            .options
            .until
            .as_ref()
            .is_some_and(|condition| self.holds(condition, &mut observed));
        let when = self
            .options
            .when
            .as_ref()
            .map_or(true, |condition| self.holds(condition, &mut observed));
        let state = match observed {
            Some(state) => state,
            None => (self.source)(),
        };

        let dependencies = ctx.finish();
        Runtime::set_dependencies(self.id, &dependencies);
        Runtime::mark_fresh(self.id);

        if activating {
            self.status.set(ReactorStatus::Active);
            debug!(reactor = %self.id, "reactor activated");
        }

        let mut stop_after = false;
        if until {
            let policy = self
                .options
                .until_at_start
                .unwrap_or_else(|| Runtime::config().until_at_start);
            if !(initial && activating && policy == InitialUntil::FireThenStop) {
                stop(self.id, &self.status, "until");
                return;
            }
            stop_after = true;
        }

        let fired = self.deliver(state, when, activating);
        if fired && self.options.once {
            stop(self.id, &self.status, "once");
        } else if stop_after {
            stop(self.id, &self.status, "until");
        }
    }

    /// Whether `condition` holds, reading the observed node at most once.
    fn holds(&self, condition: &Condition<T>, observed: &mut Option<State<T>>) -> bool {
        match condition {
            Condition::Node(read) => matches!(read(), State::Resolved(true)),
            Condition::Predicate(predicate) => observed
                .get_or_insert_with(|| (self.source)())
                .resolved()
                .is_some_and(|value| predicate(value)),
        }
    }

    /// Run the callback if the state is a new resolved value. Returns whether
    /// the callback ran.
    fn deliver(&self, state: State<T>, when: bool, activating: bool) -> bool {
        let value = match state {
            State::Resolved(value) => value,
            State::Unresolved => return false,
            State::Error(error) => {
                Runtime::report(error);
                return false;
            }
        };

        if !when {
            return false;
        }

        let unchanged = self
            .last_fired
            .borrow()
            .as_ref()
            .is_some_and(|last| (self.equality)(last, &value));
        if unchanged {
            return false;
        }

        *self.last_fired.borrow_mut() = Some(value.clone());
        if activating && self.options.skip_first {
            debug!(reactor = %self.id, "skipped first fire");
            return false;
        }

        let outcome = ReactiveContext::untracked(|| {
            let mut callback = self.callback.borrow_mut();
            (&mut **callback)(&value)
        });
        if let Err(source) = outcome {
            Runtime::report(ReactiveError::ReactorCallback {
                reactor: self.id,
                source,
            });
        }
        true
    }
}

impl<T> Reactive for ReactorInner<T>
where
    T: Clone + 'static,
{
    fn update(&self) {
        if self.is_stopped() {
            return;
        }

        // Queued because something upstream was marked, which does not mean
        // anything we read actually changed.
        if Runtime::stale_state(self.id) == StaleState::MaybeStale
            && !Runtime::dependencies_changed(self.id)
        {
            Runtime::mark_fresh(self.id);
            return;
        }

        self.evaluate(false);
    }
}

fn stop(id: NodeId, status: &Cell<ReactorStatus>, reason: &str) {
    if status.replace(ReactorStatus::Stopped) == ReactorStatus::Stopped {
        return;
    }
    debug!(reactor = %id, reason, "reactor stopped");
    Runtime::remove_reactor(id);
}

/// Handle to a reactor created by [`Derivable::react`].
///
/// Dropping the handle does not stop the reactor: an active reactor lives
/// until it stops itself (`until`, `once`) or [`stop`](Reactor::stop) is
/// called.
#[derive(Clone)]
pub struct Reactor {
    id: NodeId,
    status: Rc<Cell<ReactorStatus>>,
}

impl Reactor {
    /// Create a reactor on `source` and run its first evaluation.
    pub(crate) fn attach<T, D, F>(source: &D, callback: F, options: ReactorOptions<T>) -> Self
    where
        T: Clone + 'static,
        D: Derivable<T>,
        F: FnMut(&T) -> Result<(), CapturedError> + 'static,
    {
        let status = Rc::new(Cell::new(ReactorStatus::Pending));
        let equality = source.equality();
        let source = source.clone();

        let inner = Rc::new(ReactorInner {
            id: NodeId::new(),
            status: Rc::clone(&status),
            source: Box::new(move || source.get_state()),
            equality,
            options,
            last_fired: RefCell::new(None),
            callback: RefCell::new(Box::new(callback)),
        });
        let id = inner.id;

        Runtime::register_reactor(
            Node::new(id, NodeKind::Reactor),
            Rc::clone(&inner) as Rc<dyn Reactive>,
        );
        debug!(reactor = %id, "reactor created");

        // Changes made by the first fire run after it returns.
        Runtime::batch(|| inner.evaluate(true));

        Self { id, status }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn status(&self) -> ReactorStatus {
        self.status.get()
    }

    /// Check if the reactor is receiving changes.
    pub fn is_active(&self) -> bool {
        self.status() == ReactorStatus::Active
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == ReactorStatus::Stopped
    }

    /// Stop the reactor. Stopping twice is a no-op; a reactor stopped by its
    /// own callback is not invoked again.
    pub fn stop(&self) {
        stop(self.id, &self.status, "stopped by handle");
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, Constant};

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn fires_immediately_and_on_change() {
        let atom = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        let reactor = atom.react(callback, ReactorOptions::new());

        assert!(reactor.is_active());
        atom.set(2);
        atom.set(2);
        atom.set(3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn stop_is_idempotent() {
        let atom = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        let reactor = atom.react(callback, ReactorOptions::new());

        reactor.stop();
        reactor.stop();
        assert!(reactor.is_stopped());

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(Runtime::reactor_count(), 0);
    }

    #[test]
    fn dropping_the_handle_keeps_it_running() {
        let atom = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        drop(atom.react(callback, ReactorOptions::new()));

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn unresolved_values_are_not_delivered() {
        let atom = Atom::<i32>::unresolved();
        let (log, callback) = recorder::<i32>();
        let reactor = atom.react(callback, ReactorOptions::new());

        assert!(reactor.is_active());
        assert!(log.borrow().is_empty());

        atom.set(1);
        atom.unset();
        atom.set(1);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn errored_values_are_reported() {
        let atom = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        atom.react(callback, ReactorOptions::new());

        let error = ReactiveError::msg("sensor offline");
        atom.set_error(error.clone());
        assert_eq!(Runtime::take_errors(), vec![error]);

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn until_takes_precedence_over_the_fire() {
        let atom = Atom::new(false);
        let (log, callback) = recorder::<bool>();
        let reactor = atom.react(callback, ReactorOptions::new().until(|v: &bool| *v));

        atom.set(true);
        assert!(reactor.is_stopped());
        assert_eq!(*log.borrow(), vec![false]);
    }

    #[test]
    fn until_at_start_policy() {
        let atom = Atom::new(10);
        let (log, callback) = recorder::<i32>();
        let suppressed = atom.react(callback, ReactorOptions::new().until(|n: &i32| *n > 5));
        assert!(suppressed.is_stopped());
        assert!(log.borrow().is_empty());

        let (log, callback) = recorder::<i32>();
        let fired = atom.react(
            callback,
            ReactorOptions::new()
                .until(|n: &i32| *n > 5)
                .until_at_start(InitialUntil::FireThenStop),
        );
        assert!(fired.is_stopped());
        assert_eq!(*log.borrow(), vec![10]);
    }

    #[test]
    fn until_at_start_follows_the_runtime_config() {
        Runtime::configure(crate::reactive::RuntimeConfig {
            until_at_start: InitialUntil::FireThenStop,
            ..Default::default()
        });

        let atom = Atom::new(10);
        let (log, callback) = recorder::<i32>();
        atom.react(callback, ReactorOptions::new().until(|n: &i32| *n > 5));
        assert_eq!(*log.borrow(), vec![10]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let atom = Atom::new(0);
        let (log, callback) = recorder::<i32>();
        let reactor = atom.react(callback, ReactorOptions::new().once().when(|n: &i32| *n > 0));

        assert!(reactor.is_active());
        atom.set(1);
        atom.set(2);
        assert!(reactor.is_stopped());
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn skip_first_suppresses_only_activation() {
        let atom = Atom::new(false);
        let (log, callback) = recorder::<bool>();
        atom.react(callback, ReactorOptions::new().skip_first());

        assert!(log.borrow().is_empty());
        atom.set(true);
        assert_eq!(*log.borrow(), vec![true]);
    }

    #[test]
    fn pending_reactor_only_watches_from() {
        let gate = Atom::new(false);
        let value = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        let reactor = value.react(callback, ReactorOptions::new().from_node(&gate));

        assert_eq!(reactor.status(), ReactorStatus::Pending);
        value.set(2);
        assert!(log.borrow().is_empty());

        gate.set(true);
        assert!(reactor.is_active());
        gate.set(false);
        value.set(3);
        assert_eq!(*log.borrow(), vec![2, 3]);
    }

    #[test]
    fn callback_errors_are_reported_after_the_pass() {
        let atom = Atom::new(1);
        let (log, callback) = recorder::<i32>();
        atom.try_react(
            |n: &i32| {
                if *n > 1 {
                    Err(std::fmt::Error)
                } else {
                    Ok(())
                }
            },
            ReactorOptions::new(),
        );
        atom.react(callback, ReactorOptions::new());

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
        let errors = Runtime::take_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ReactiveError::ReactorCallback { .. }));
    }

    #[test]
    fn reacting_to_a_constant_fires_once() {
        let constant = Constant::new("fixed");
        let (log, callback) = recorder::<&'static str>();
        let reactor = constant.react(callback, ReactorOptions::new());

        assert!(reactor.is_active());
        assert_eq!(*log.borrow(), vec!["fixed"]);
    }

    #[test]
    fn callback_reads_are_not_tracked() {
        let observed = Atom::new(1);
        let unrelated = Atom::new(100);
        let fires = Rc::new(Cell::new(0));
        let (counter, other) = (Rc::clone(&fires), unrelated.clone());
        observed.react(
            move |_| {
                other.get_or(0);
                counter.set(counter.get() + 1);
            },
            ReactorOptions::new(),
        );

        unrelated.set(200);
        assert_eq!(fires.get(), 1);
    }
}
