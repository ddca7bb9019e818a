//! Transactions
//!
//! A transaction holds reactors back while a block of code mutates atoms,
//! then runs one propagation pass when it commits. If the block fails, every
//! atom it touched is put back the way it was.
//!
//! Reads inside a transaction already see the new values: marking happens on
//! every mutation, only firing waits for the commit.

use indexmap::IndexSet;
use tracing::debug;

use super::runtime::Runtime;
use crate::graph::NodeId;

/// Restore actions for the atoms one transaction touched.
#[derive(Default)]
pub(crate) struct Snapshot {
    touched: IndexSet<NodeId>,
    restores: Vec<Box<dyn FnOnce()>>,
}

impl Snapshot {
    pub(crate) fn has_touched(&self, id: NodeId) -> bool {
        self.touched.contains(&id)
    }

    pub(crate) fn record(&mut self, id: NodeId, restore: Box<dyn FnOnce()>) {
        if self.touched.insert(id) {
            self.restores.push(restore);
        }
    }

    /// Take over a committed child's entries, keeping our own where both
    /// touched the same atom. Returns the child entries we did not need.
    pub(crate) fn absorb(&mut self, child: Snapshot) -> Snapshot {
        let mut leftover = Snapshot::default();
        for (id, restore) in child.touched.into_iter().zip(child.restores) {
            if self.touched.insert(id) {
                self.restores.push(restore);
            } else {
                leftover.touched.insert(id);
                leftover.restores.push(restore);
            }
        }
        leftover
    }

    pub(crate) fn len(&self) -> usize {
        self.restores.len()
    }

    /// Run the restore actions, most recent first.
    fn restore(self) {
        for restore in self.restores.into_iter().rev() {
            restore();
        }
    }
}

/// An open transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back, so an early return or a panic inside the scope leaves the atoms it
/// touched unchanged.
pub struct Transaction {
    finished: bool,
}

impl Transaction {
    /// Open a transaction. Reactors are held back until the outermost open
    /// transaction or batch closes.
    pub fn begin() -> Self {
        Runtime::begin_batch();
        Runtime::push_snapshot();
        Self { finished: false }
    }

    /// Keep the changes and, if this is the outermost scope, run the pass.
    pub fn commit(mut self) {
        self.finished = true;
        if let Some(snapshot) = Runtime::pop_snapshot() {
            let leftover = Runtime::merge_snapshot(snapshot);
            drop(leftover);
        }
        Runtime::end_batch();
    }

    /// Put every atom touched in this transaction back to its prior state.
    pub fn rollback(mut self) {
        self.finished = true;
        Self::abort();
    }

    fn abort() {
        if let Some(snapshot) = Runtime::pop_snapshot() {
            debug!(atoms = snapshot.len(), "rolling back transaction");
            snapshot.restore();
        }
        Runtime::end_batch();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            Self::abort();
        }
    }
}

/// Run `f` as one transaction.
///
/// On `Ok` the mutations are committed as a single propagation pass. On `Err`
/// every atom `f` mutated is restored and the error is returned.
///
/// ```
/// use derivable_core::{transact, Atom, Derivable, ReactiveError};
///
/// let balance = Atom::new(100);
/// let result: Result<(), ReactiveError> = transact(|| {
///     balance.set(50);
///     Err(ReactiveError::msg("insufficient funds"))
/// });
///
/// assert!(result.is_err());
/// assert_eq!(balance.get(), Ok(100));
/// ```
pub fn transact<R, E>(f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
    let transaction = Transaction::begin();
    let result = f();
    match result {
        Ok(_) => transaction.commit(),
        Err(_) => transaction.rollback(),
    }
    result
}

/// Run `f` with reactors held back until it returns, without rollback.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::batch(f)
}
