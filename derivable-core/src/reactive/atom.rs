//! Atom Implementation
//!
//! An atom is the mutable leaf of the graph. It holds a value, no value
//! (unresolved) or an error, and is changed only through `set`, `unset` and
//! `set_error`.
//!
//! # How Atoms Work
//!
//! 1. When an atom is read within a capture scope (a derivation or reactor
//!    being evaluated), the read is recorded as a dependency.
//!
//! 2. `set` compares the new value with the current one using the atom's
//!    equality. An equal value is a no-op: no version bump, no propagation.
//!
//! 3. A real change bumps the version, marks every dependent maybe stale and
//!    runs the affected reactors before `set` returns.
//!
//! # Memory Layout
//!
//! Each atom consists of:
//! - A unique ID (8 bytes)
//! - The state, behind a shared `Rc`
//! - The equality used for change detection
//!
//! Version and edges live in the graph, keyed by the ID.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use super::context::ReactiveContext;
use super::derivable::Derivable;
use super::runtime::Runtime;
use super::state::{default_equality, is_change, Equality, State};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeId, NodeKind};

struct AtomInner<T> {
    /// Unique identifier for this atom.
    id: NodeId,

    state: RefCell<State<T>>,

    equality: Equality<T>,
}

impl<T> Drop for AtomInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A mutable reactive value.
///
/// Cloning an `Atom` creates a new handle to the **same** atom.
///
/// # Example
///
/// ```
/// use derivable_core::{Atom, Derivable};
///
/// let count = Atom::new(0);
/// count.set(5);
/// assert_eq!(count.get(), Ok(5));
///
/// // Setting an equal value is not a change
/// count.set(5);
/// assert_eq!(count.version(), 1);
/// ```
pub struct Atom<T> {
    inner: Rc<AtomInner<T>>,
}

impl<T> Atom<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new atom with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_state(State::Resolved(value), default_equality())
    }

    /// Create an atom with no value yet.
    pub fn unresolved() -> Self {
        Self::with_state(State::Unresolved, default_equality())
    }
}

impl<T> Atom<T>
where
    T: Clone + 'static,
{
    /// Create an atom that detects changes with `equality`.
    pub fn with_equality(value: T, equality: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::with_state(State::Resolved(value), Rc::new(equality))
    }

    fn with_state(state: State<T>, equality: Equality<T>) -> Self {
        let id = Runtime::register(Node::new(NodeId::new(), NodeKind::Atom));
        Self {
            inner: Rc::new(AtomInner {
                id,
                state: RefCell::new(state),
                equality,
            }),
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Set a new value.
    ///
    /// If it differs from the current value, dependents are marked stale and
    /// reactors fire before this returns.
    pub fn set(&self, value: T) {
        self.apply(State::Resolved(value), false);
    }

    /// Clear the value. Always counts as a change.
    pub fn unset(&self) {
        self.apply(State::Unresolved, true);
    }

    /// Put the atom in an error state; every read raises `error` until the
    /// atom changes again. Always counts as a change.
    pub fn set_error(&self, error: ReactiveError) {
        self.apply(State::Error(error), true);
    }

    /// Update the value using a function.
    ///
    /// Does nothing while the atom is unresolved or errored. `f` sees a copy
    /// of the current value and may itself set this atom.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let State::Resolved(current) = self.get_untracked() else {
            return;
        };
        self.set(f(&current));
    }

    /// Get the current state without tracking it as a dependency.
    pub fn get_untracked(&self) -> State<T> {
        self.inner.state.borrow().clone()
    }

    fn apply(&self, next: State<T>, always: bool) {
        let changed = always || {
            let current = self.inner.state.borrow();
            is_change(&self.inner.equality, &current, &next)
        };
        if !changed {
            trace!(node = %self.inner.id, "atom set to an equal value");
            return;
        }

        Runtime::record_prior(self.inner.id, || {
            let atom = self.clone();
            let prior = self.get_untracked();
            let restore: Box<dyn FnOnce()> = Box::new(move || atom.restore(prior));
            restore
        });
        self.replace(next);
    }

    /// Put back a state recorded by a transaction, as a new change.
    fn restore(&self, prior: State<T>) {
        let changed = {
            let current = self.inner.state.borrow();
            is_change(&self.inner.equality, &current, &prior)
        };
        if changed {
            self.replace(prior);
        }
    }

    fn replace(&self, next: State<T>) {
        // The previous state is dropped after the borrow ends.
        let _previous = self.inner.state.replace(next);
        Runtime::notify_changed(self.inner.id);
    }
}

impl<T> Derivable<T> for Atom<T>
where
    T: Clone + 'static,
{
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn version(&self) -> u64 {
        Runtime::version(self.inner.id)
    }

    fn get_state(&self) -> State<T> {
        ReactiveContext::track_dependency(self.inner.id);
        self.get_untracked()
    }

    fn equality(&self) -> Equality<T> {
        Rc::clone(&self.inner.equality)
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Atom<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("state", &self.get_untracked())
            .field("version", &self.version())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
