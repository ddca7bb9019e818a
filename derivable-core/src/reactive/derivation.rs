//! Derivation Implementation
//!
//! A derivation is a cached value computed from other nodes. Its dependencies
//! are whatever the computation read during its latest run.
//!
//! # How Derivations Work
//!
//! 1. Nothing runs at construction. The first read computes and caches.
//!
//! 2. When an atom upstream changes, the derivation is marked "maybe stale".
//!
//! 3. On the next read, it refreshes its dependencies in the order they were
//!    read and compares their versions with the ones it observed. If none
//!    moved, the cache is reused and the derivation becomes fresh again.
//!
//! 4. Otherwise it recomputes, replaces its dependency set, and bumps its
//!    version only if the new state differs under its equality.
//!
//! # Why This Matters
//!
//! - An atom changes
//! - A derivation downstream recomputes to an equal value
//! - Its own dependents see no version change and skip recomputation
//!
//! A derivation nobody reads never recomputes.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::ReactiveContext;
use super::derivable::Derivable;
use super::runtime::{Reactive, Runtime};
use super::state::{default_equality, is_change, Equality, State};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeId, NodeKind, StaleState};

type Compute<T> = Box<dyn Fn() -> Result<T, ReactiveError>>;

struct DerivationInner<T> {
    id: NodeId,

    /// The computation function.
    compute: Compute<T>,

    /// The state produced by the latest computation.
    cached: RefCell<State<T>>,

    equality: Equality<T>,
}

impl<T> DerivationInner<T>
where
    T: Clone + 'static,
{
    /// Bring the cache up to date.
    ///
    /// Fails only when the derivation is read while it is being computed.
    fn refresh(&self) -> Result<(), ReactiveError> {
        if ReactiveContext::is_evaluating(self.id) {
            return Err(ReactiveError::CyclicDependency { node: self.id });
        }

        match Runtime::stale_state(self.id) {
            StaleState::Fresh => Ok(()),
            StaleState::MaybeStale if !Runtime::dependencies_changed(self.id) => {
                Runtime::mark_fresh(self.id);
                Ok(())
            }
            _ => {
                self.recompute();
                Ok(())
            }
        }
    }

    fn recompute(&self) {
        let ctx = ReactiveContext::enter(self.id);
        let outcome = (self.compute)();
        let dependencies = ctx.finish();
        Runtime::set_dependencies(self.id, &dependencies);

        let next = State::from_result(outcome);
        let changed = is_change(&self.equality, &self.cached.borrow(), &next);
        if changed {
            // The previous state is dropped after the borrow ends.
            let _previous = self.cached.replace(next);
            Runtime::bump_version(self.id);
        }
        Runtime::mark_fresh(self.id);

        trace!(
            node = %self.id,
            dependencies = dependencies.len(),
            changed,
            "derivation recomputed"
        );
    }
}

impl<T> Reactive for DerivationInner<T>
where
    T: Clone + 'static,
{
    fn update(&self) {
        // A cycle is reported to the reader that triggered it.
        let _ = self.refresh();
    }
}

impl<T> Drop for DerivationInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A cached value computed from other reactive nodes.
///
/// The computation returns `Err(ReactiveError::Unresolved)` (usually by
/// `?`-propagating an unresolved read) to leave the derivation unresolved,
/// or any other error to put it in an error state.
///
/// # Example
///
/// ```
/// use derivable_core::{Atom, Derivable, Derivation};
///
/// let width = Atom::new(3);
/// let height = Atom::new(4);
/// let area = {
///     let (width, height) = (width.clone(), height.clone());
///     Derivation::new(move || Ok(width.get()? * height.get()?))
/// };
///
/// assert_eq!(area.get(), Ok(12));
/// width.set(5);
/// assert_eq!(area.get(), Ok(20));
/// ```
pub struct Derivation<T> {
    inner: Rc<DerivationInner<T>>,
}

impl<T> Derivation<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a derivation that detects changes with `==`.
    ///
    /// The computation is not run immediately. It runs on first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T, ReactiveError> + 'static,
    {
        Self::build(Box::new(compute), default_equality())
    }
}

impl<T> Derivation<T>
where
    T: Clone + 'static,
{
    /// Create a derivation that detects changes with `equality`.
    pub fn with_equality<F>(compute: F, equality: impl Fn(&T, &T) -> bool + 'static) -> Self
    where
        F: Fn() -> Result<T, ReactiveError> + 'static,
    {
        Self::build(Box::new(compute), Rc::new(equality))
    }

    fn build(compute: Compute<T>, equality: Equality<T>) -> Self {
        let inner = Rc::new(DerivationInner {
            id: NodeId::new(),
            compute,
            cached: RefCell::new(State::Unresolved),
            equality,
        });

        let hook: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        Runtime::register(Node::new(inner.id, NodeKind::Derivation).with_hook(hook));

        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Check if the cache needs to be brought up to date before the next read.
    pub fn is_stale(&self) -> bool {
        Runtime::stale_state(self.inner.id) != StaleState::Fresh
    }
}

impl<T> Derivable<T> for Derivation<T>
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
        if let Err(error) = self.inner.refresh() {
            return State::Error(error);
        }
        ReactiveContext::track_dependency(self.inner.id);
        self.inner.cached.borrow().clone()
    }

    fn equality(&self) -> Equality<T> {
        Rc::clone(&self.inner.equality)
    }
}

impl<T> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Derivation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.inner.id)
            .field("cached", &self.inner.cached.borrow())
            .finish()
    }
}

/// Build a derivation from a computation.
pub fn derivation<T, F>(compute: F) -> Derivation<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> Result<T, ReactiveError> + 'static,
{
    Derivation::new(compute)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Atom;
    use std::cell::Cell;

    fn counted<T, F>(runs: &Rc<Cell<u32>>, compute: F) -> Derivation<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T, ReactiveError> + 'static,
    {
        let runs = Rc::clone(runs);
        Derivation::new(move || {
            runs.set(runs.get() + 1);
            compute()
        })
    }

    #[test]
    fn derivation_is_lazy_and_cached() {
        let runs = Rc::new(Cell::new(0));
        let source = Atom::new(2);
        let doubled = {
            let source = source.clone();
            counted(&runs, move || Ok(source.get()? * 2))
        };

        assert_eq!(runs.get(), 0);
        assert_eq!(doubled.get(), Ok(4));
        assert_eq!(doubled.get(), Ok(4));
        assert_eq!(runs.get(), 1);

        source.set(3);
        assert_eq!(runs.get(), 1);
        assert!(doubled.is_stale());
        assert_eq!(doubled.get(), Ok(6));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn equal_result_does_not_bump_version() {
        let source = Atom::new(4);
        let parity = source.derive(|n| n % 2);
        let runs = Rc::new(Cell::new(0));
        let label = {
            let parity = parity.clone();
            counted(&runs, move || Ok(format!("parity {}", parity.get()?)))
        };

        assert_eq!(label.get().as_deref(), Ok("parity 0"));
        let version = parity.version();

        source.set(6);
        assert_eq!(label.get().as_deref(), Ok("parity 0"));
        assert_eq!(parity.version(), version);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn dependencies_follow_the_latest_run() {
        let use_left = Atom::new(true);
        let left = Atom::new("left");
        let right = Atom::new("right");
        let runs = Rc::new(Cell::new(0));
        let picked = {
            let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
            counted(&runs, move || {
                if use_left.get()? {
                    left.get()
                } else {
                    right.get()
                }
            })
        };

        assert_eq!(picked.get(), Ok("left"));
        right.set("other");
        assert!(!picked.is_stale());

        use_left.set(false);
        assert_eq!(picked.get(), Ok("other"));
        left.set("ignored");
        assert!(!picked.is_stale());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));
        let looped = {
            let slot = Rc::clone(&slot);
            Derivation::new(move || {
                let me = slot.borrow().clone().ok_or(ReactiveError::Unresolved)?;
                me.get()
            })
        };
        *slot.borrow_mut() = Some(looped.clone());

        assert_eq!(
            looped.get(),
            Err(ReactiveError::CyclicDependency { node: looped.id() })
        );
        slot.borrow_mut().take();
    }

    #[test]
    fn computation_errors_are_cached_and_recover() {
        let input = Atom::new(1);
        let checked = {
            let input = input.clone();
            Derivation::new(move || {
                let n = input.get()?;
                if n < 0 {
                    Err(ReactiveError::msg("negative"))
                } else {
                    Ok(n)
                }
            })
        };

        input.set(-1);
        assert!(matches!(checked.get(), Err(ReactiveError::Computation(_))));
        assert!(checked.get_state().is_error());

        input.set(2);
        assert_eq!(checked.get(), Ok(2));
    }

    #[test]
    fn dropping_a_derivation_unregisters() {
        let before = Runtime::node_count();
        let source = Atom::new(1);
        let derived = source.derive(|n| n + 1);
        assert_eq!(derived.get(), Ok(2));
        assert_eq!(Runtime::node_count(), before + 2);

        drop(derived);
        assert_eq!(Runtime::node_count(), before + 1);
        source.set(5);
    }
}
