//! Constant Implementation
//!
//! A constant is an immutable leaf: its version is permanently 0 and it is
//! never registered in the graph, since nothing about it can change.

use std::fmt::{self, Debug};
use std::rc::Rc;

use super::context::ReactiveContext;
use super::derivable::Derivable;
use super::state::{default_equality, Equality, State};
use crate::graph::NodeId;

/// An immutable reactive value.
pub struct Constant<T> {
    id: NodeId,
    value: Rc<T>,
}

impl<T: Clone + 'static> Constant<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: NodeId::new(),
            value: Rc::new(value),
        }
    }

    /// The wrapped value, without tracking.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + PartialEq + 'static> Derivable<T> for Constant<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        0
    }

    fn get_state(&self) -> State<T> {
        ReactiveContext::track_dependency(self.id);
        State::Resolved(T::clone(&self.value))
    }

    fn equality(&self) -> Equality<T> {
        default_equality()
    }
}

impl<T> Clone for Constant<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: Debug> Debug for Constant<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constant")
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}
