//! Reactive Primitives
//!
//! This module implements the node types of the dataflow graph: constants,
//! atoms, derivations and reactors, plus the transaction scope that groups
//! mutations into one propagation pass.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An atom is a container for mutable state. Reading it inside a derivation or
//! reactor registers it as a dependency; changing it marks every dependent
//! stale and runs the affected reactors before the mutating call returns.
//!
//! ## Derivations
//!
//! A derivation is a pure function of other nodes that caches its result. It
//! recomputes lazily, on the first read after something it read changed, and
//! at most once per change.
//!
//! ## Reactors
//!
//! A reactor runs a side effect with a node's value whenever that value
//! changes, subject to lifecycle options (`from`, `when`, `until`, `once`,
//! `skip_first`).
//!
//! # Implementation Notes
//!
//! Dependencies are captured, not declared: a thread-local stack of capture
//! frames records every node read while a derivation or reactor evaluates.
//! The captured set replaces the node's previous one, so the graph follows
//! whatever a computation actually read last time.

mod atom;
mod constant;
mod context;
mod derivable;
mod derivation;
mod options;
mod reactor;
mod runtime;
mod state;
mod transaction;

pub use atom::Atom;
pub use constant::Constant;
pub use context::ReactiveContext;
pub use derivable::{BoolDerivable, Derivable};
pub use derivation::{derivation, Derivation};
pub use options::{Condition, InitialUntil, ReactorOptions};
pub use reactor::{Reactor, ReactorStatus};
pub use runtime::{Reactive, Runtime, RuntimeConfig};
pub use state::{default_equality, Equality, State};
pub use transaction::{batch, transact, Transaction};

/// Run `f` without recording the reads it makes as dependencies of the
/// derivation or reactor currently evaluating.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    ReactiveContext::untracked(f)
}
