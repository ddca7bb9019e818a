//! Reactive Context
//!
//! The reactive context is the capture mechanism: it records which nodes a
//! running computation reads, so the computation's dependency set can be
//! replaced when it finishes.
//!
//! # Implementation
//!
//! We use a thread-local stack of capture frames. Evaluating a derivation or
//! a reactor pushes a frame owned by that node; every read registers the node
//! read into the top frame. Frames nest, so a derivation reading another
//! derivation records only its direct dependencies.
//!
//! The stack also answers "is this node already being evaluated?", which is
//! how a derivation that reads itself is caught before it recurses.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The node being evaluated. `None` for an untracked scope.
    owner: Option<NodeId>,
    /// Nodes read so far, in first-read order.
    dependencies: IndexSet<NodeId>,
}

/// Guard for a capture frame.
///
/// The frame is popped when the guard is finished or dropped, so the stack
/// stays balanced even if the computation panics.
pub struct ReactiveContext {
    owner: Option<NodeId>,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a new capture frame for the given node.
    pub fn enter(owner: NodeId) -> Self {
        Self::push(Some(owner))
    }

    fn push(owner: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                owner,
                dependencies: IndexSet::new(),
            });
        });

        Self {
            owner,
            popped: false,
        }
    }

    /// Run `f` without recording any read it makes.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _ctx = Self::push(None);
        f()
    }

    /// Check if reads are currently being recorded.
    #[cfg(test)]
    fn is_active() -> bool {
        Self::current_owner().is_some()
    }

    /// The node whose evaluation is recording reads, if any.
    #[cfg(test)]
    fn current_owner() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.owner))
    }

    /// Whether `node` is somewhere on the evaluation stack.
    pub fn is_evaluating(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.owner == Some(node))
        })
    }

    /// Record a read of `node` in the current frame.
    ///
    /// Repeated reads are recorded once. A node reading itself is ignored.
    pub fn track_dependency(node: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.owner.is_some_and(|owner| owner != node) {
                    entry.dependencies.insert(node);
                }
            }
        });
    }

    /// Pop the frame and return what it captured.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&mut self) -> Option<ContextEntry> {
        if self.popped {
            return None;
        }
        self.popped = true;

        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.owner, self.owner,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.owner, entry.owner
            );
        }
        popped
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        self.pop();
    }
}
