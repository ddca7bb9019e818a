//! The capability shared by every reactive node.
//!
//! Anything that can be read and has a version is a [`Derivable`]: constants,
//! atoms and derivations. Composition (`derive`, `is`, the boolean
//! combinators) and observation (`react`) are provided on top of the four
//! required methods, and all composition produces ordinary [`Derivation`]s.

use std::error::Error;

use super::derivation::Derivation;
use super::options::ReactorOptions;
use super::reactor::Reactor;
use super::state::{Equality, State};
use crate::error::{CapturedError, ReactiveError};
use crate::graph::NodeId;

/// A readable, versioned reactive node.
pub trait Derivable<T>: Clone + 'static
where
    T: Clone + 'static,
{
    /// This node's id in the graph.
    fn id(&self) -> NodeId;

    /// The node's version. Increases exactly when its state materially changes.
    fn version(&self) -> u64;

    /// The node's current state, brought up to date first. Never fails.
    ///
    /// Inside a capture scope this records the node as a dependency.
    fn get_state(&self) -> State<T>;

    /// The equality this node uses to detect changes.
    fn equality(&self) -> Equality<T>;

    /// The node's value.
    ///
    /// Fails with [`ReactiveError::Unresolved`] if there is no value yet, or
    /// with the node's error if it is in an error state.
    fn get(&self) -> Result<T, ReactiveError> {
        self.get_state().into_result()
    }

    /// The node's value, or `fallback` if it is unresolved or errored.
    fn get_or(&self, fallback: T) -> T {
        self.get().unwrap_or(fallback)
    }

    fn is_resolved(&self) -> bool {
        self.get_state().is_resolved()
    }

    /// A derivation applying `f` to this node's value.
    ///
    /// ```
    /// use derivable_core::{Atom, Derivable};
    ///
    /// let name = Atom::new("world".to_string());
    /// let greeting = name.derive(|name| format!("hello, {name}"));
    /// assert_eq!(greeting.get().as_deref(), Ok("hello, world"));
    /// ```
    fn derive<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let source = self.clone();
        Derivation::new(move || source.get().map(|value| f(&value)))
    }

    /// A derivation that is `true` while both nodes hold equal values.
    fn is<D>(&self, other: &D) -> Derivation<bool>
    where
        D: Derivable<T>,
        T: PartialEq,
    {
        let (this, other) = (self.clone(), other.clone());
        Derivation::new(move || Ok(this.get()? == other.get()?))
    }

    /// A derivation that is `true` while this node equals `value`.
    fn is_value(&self, value: T) -> Derivation<bool>
    where
        T: PartialEq,
    {
        let this = self.clone();
        Derivation::new(move || Ok(this.get()? == value))
    }

    /// Run `callback` with this node's value now and whenever it changes,
    /// subject to `options`.
    fn react<F>(&self, callback: F, options: ReactorOptions<T>) -> Reactor
    where
        F: FnMut(&T) + 'static,
    {
        let mut callback = callback;
        Reactor::attach(
            self,
            move |value: &T| {
                callback(value);
                Ok(())
            },
            options,
        )
    }

    /// Like [`react`](Derivable::react), for callbacks that can fail.
    ///
    /// A failure does not stop the reactor or the pass; it is reported as
    /// [`ReactiveError::ReactorCallback`] once the pass completes.
    fn try_react<F, E>(&self, callback: F, options: ReactorOptions<T>) -> Reactor
    where
        F: FnMut(&T) -> Result<(), E> + 'static,
        E: Error + 'static,
    {
        let mut callback = callback;
        Reactor::attach(
            self,
            move |value: &T| callback(value).map_err(CapturedError::new),
            options,
        )
    }
}

/// Boolean combinators over `bool` nodes.
pub trait BoolDerivable: Derivable<bool> {
    fn and<D: Derivable<bool>>(&self, other: &D) -> Derivation<bool> {
        let (this, other) = (self.clone(), other.clone());
        Derivation::new(move || Ok(this.get()? && other.get()?))
    }

    fn or<D: Derivable<bool>>(&self, other: &D) -> Derivation<bool> {
        let (this, other) = (self.clone(), other.clone());
        Derivation::new(move || Ok(this.get()? || other.get()?))
    }

    fn not(&self) -> Derivation<bool> {
        self.derive(|value| !value)
    }
}

impl<D: Derivable<bool>> BoolDerivable for D {}
