//! Derivable Core
//!
//! This crate provides a synchronous reactive dataflow runtime: a graph of
//! values where atoms are mutable sources, derivations are lazily computed
//! from other nodes with automatically tracked dependencies, and reactors
//! run side effects exactly when the values they observe change.
//!
//! It guarantees:
//!
//! - No redundant recomputation: a derivation recomputes at most once per
//!   upstream change, and only when it is read.
//! - No stale reads: every read returns a value consistent with the latest
//!   mutations.
//! - Deterministic propagation: all reactors affected by a mutation run, in
//!   dependency order, before the mutating call returns.
//!
//! # Architecture
//!
//! - `graph`: the node arena, dependency edges and reactor scheduling
//! - `reactive`: atoms, derivations, reactors, transactions and the runtime
//!
//! # Example
//!
//! ```
//! use derivable_core::{atom, Derivable, ReactorOptions};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let name = atom("world".to_string());
//! let greeting = name.derive(|name| format!("hello, {name}"));
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! greeting.react(
//!     move |text| sink.borrow_mut().push(text.clone()),
//!     ReactorOptions::new(),
//! );
//!
//! name.set("derivable".to_string());
//! assert_eq!(*seen.borrow(), vec!["hello, world", "hello, derivable"]);
//! ```

pub mod graph;
pub mod reactive;

mod error;

pub use error::{CapturedError, ReactiveError};
pub use graph::NodeId;
pub use reactive::{
    batch, derivation, transact, untracked, Atom, BoolDerivable, Condition, Constant, Derivable,
    Derivation, InitialUntil, Reactor, ReactorOptions, ReactorStatus, Runtime, RuntimeConfig,
    State, Transaction,
};

/// Create an atom holding `value`.
pub fn atom<T: Clone + PartialEq + 'static>(value: T) -> Atom<T> {
    Atom::new(value)
}

/// Create a constant holding `value`.
pub fn constant<T: Clone + 'static>(value: T) -> Constant<T> {
    Constant::new(value)
}
