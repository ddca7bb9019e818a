//! Error types for the reactive runtime.
//!
//! Every read of a node returns `Result<T, ReactiveError>`. The error is
//! `Clone` because a node in an error state hands the same error to every
//! reader until it changes.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::graph::NodeId;

/// An error raised while reading or propagating reactive values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// The node has no value yet.
    ///
    /// Recoverable by the caller through `get_or` or `get_state`. A derivation
    /// whose function returns this error becomes unresolved itself.
    #[error("node is unresolved")]
    Unresolved,

    /// A derivation read itself, directly or through other derivations, while
    /// it was being evaluated.
    #[error("cyclic dependency detected while evaluating {node}")]
    CyclicDependency {
        /// The derivation that was re-entered.
        node: NodeId,
    },

    /// A deriving function failed, or an atom was put into an error state.
    #[error("computation failed: {0}")]
    Computation(#[source] CapturedError),

    /// A reactor callback failed. Reported after the propagation pass.
    #[error("reactor {reactor} callback failed: {source}")]
    ReactorCallback {
        /// The reactor whose callback failed.
        reactor: NodeId,
        /// What the callback returned.
        #[source]
        source: CapturedError,
    },

    /// Reactors kept re-triggering each other past the configured bound.
    #[error("propagation pass exceeded {limit} reactions")]
    PropagationLimit {
        /// The configured `max_reactions_per_pass`.
        limit: usize,
    },
}

impl ReactiveError {
    /// Wrap an arbitrary error as a computation failure.
    pub fn computation<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::Computation(CapturedError::new(error))
    }

    /// Build a computation failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Computation(CapturedError::msg(message))
    }

    /// Whether this is the "no value yet" error.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }
}

/// A user error captured by the runtime.
///
/// Shared by reference count so an errored node can re-raise it on every
/// read. Two captured errors are equal only if they are the same capture.
#[derive(Clone)]
pub struct CapturedError(Rc<dyn std::error::Error + 'static>);

impl CapturedError {
    /// Capture an error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self(Rc::new(error))
    }

    /// Capture a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Rc::new(Message(message.into())))
    }

    /// The captured error.
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        &*self.0
    }
}

impl PartialEq for CapturedError {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for CapturedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_errors_compare_by_identity() {
        let first = CapturedError::msg("boom");
        let second = CapturedError::msg("boom");

        assert_eq!(first, first.clone());
        assert_ne!(first, second);
    }

    #[test]
    fn display_includes_the_cause() {
        let error = ReactiveError::msg("disk full");
        assert_eq!(error.to_string(), "computation failed: disk full");

        let error = ReactiveError::CyclicDependency { node: NodeId::from(7) };
        assert_eq!(
            error.to_string(),
            "cyclic dependency detected while evaluating #7"
        );
    }

    #[test]
    fn computation_wraps_foreign_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "io");
        let error = ReactiveError::computation(io);

        assert!(matches!(error, ReactiveError::Computation(_)));
        assert!(!error.is_unresolved());
        assert!(ReactiveError::Unresolved.is_unresolved());
    }
}
