//! Reactor options.
//!
//! Options control when a reactor starts (`from`), which changes it fires for
//! (`when`), when it stops for good (`until`, `once`) and whether the value it
//! sees on activation is delivered (`skip_first`).

use std::fmt;
use std::rc::Rc;

use super::derivable::Derivable;
use super::state::State;

/// What a reactor does when `until` already holds at the moment it activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InitialUntil {
    /// Stop without firing.
    #[default]
    Suppress,

    /// Fire once with the current value, then stop.
    FireThenStop,
}

/// A lifecycle condition.
pub enum Condition<T> {
    /// A predicate over the observed value. Reads it makes are tracked, so it
    /// may depend on other nodes. Never holds for an unresolved or errored
    /// value.
    Predicate(Rc<dyn Fn(&T) -> bool>),

    /// A boolean node. Holds only while it resolves to `true`.
    Node(Rc<dyn Fn() -> State<bool>>),
}

impl<T> Condition<T> {
    pub fn predicate(predicate: impl Fn(&T) -> bool + 'static) -> Self {
        Self::Predicate(Rc::new(predicate))
    }

    pub fn node<D: Derivable<bool>>(node: &D) -> Self {
        let node = node.clone();
        Self::Node(Rc::new(move || node.get_state()))
    }
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Predicate(predicate) => Self::Predicate(Rc::clone(predicate)),
            Self::Node(node) => Self::Node(Rc::clone(node)),
        }
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(_) => f.write_str("Condition::Predicate(..)"),
            Self::Node(_) => f.write_str("Condition::Node(..)"),
        }
    }
}

/// Options for [`Derivable::react`].
///
/// ```
/// use derivable_core::{Atom, Derivable, ReactorOptions};
///
/// let count = Atom::new(0);
/// let reactor = count.react(
///     |n| println!("even: {n}"),
///     ReactorOptions::new().when(|n: &i32| n % 2 == 0).until(|n: &i32| *n > 10),
/// );
/// assert!(reactor.is_active());
/// ```
pub struct ReactorOptions<T> {
    pub(crate) from: Option<Condition<T>>,
    pub(crate) when: Option<Condition<T>>,
    pub(crate) until: Option<Condition<T>>,
    pub(crate) once: bool,
    pub(crate) skip_first: bool,
    pub(crate) until_at_start: Option<InitialUntil>,
}

impl<T> ReactorOptions<T> {
    pub fn new() -> Self {
        Self {
            from: None,
            when: None,
            until: None,
            once: false,
            skip_first: false,
            until_at_start: None,
        }
    }

    /// Stay pending until `predicate` holds; afterwards it is ignored.
    pub fn from(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.from = Some(Condition::predicate(predicate));
        self
    }

    /// Stay pending until `node` is `true`; afterwards it is ignored.
    pub fn from_node<D: Derivable<bool>>(mut self, node: &D) -> Self {
        self.from = Some(Condition::node(node));
        self
    }

    /// Only fire while `predicate` holds.
    pub fn when(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.when = Some(Condition::predicate(predicate));
        self
    }

    /// Only fire while `node` is `true`.
    pub fn when_node<D: Derivable<bool>>(mut self, node: &D) -> Self {
        self.when = Some(Condition::node(node));
        self
    }

    /// Stop as soon as `predicate` holds, without firing for that change.
    pub fn until(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.until = Some(Condition::predicate(predicate));
        self
    }

    /// Stop as soon as `node` is `true`, without firing for that change.
    pub fn until_node<D: Derivable<bool>>(mut self, node: &D) -> Self {
        self.until = Some(Condition::node(node));
        self
    }

    /// Stop after the first fire.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Do not fire on activation.
    pub fn skip_first(mut self) -> Self {
        self.skip_first = true;
        self
    }

    /// Override the runtime's [`InitialUntil`] policy for this reactor.
    pub fn until_at_start(mut self, policy: InitialUntil) -> Self {
        self.until_at_start = Some(policy);
        self
    }
}

impl<T> Default for ReactorOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReactorOptions<T> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            when: self.when.clone(),
            until: self.until.clone(),
            once: self.once,
            skip_first: self.skip_first,
            until_at_start: self.until_at_start,
        }
    }
}

impl<T> fmt::Debug for ReactorOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorOptions")
            .field("from", &self.from)
            .field("when", &self.when)
            .field("until", &self.until)
            .field("once", &self.once)
            .field("skip_first", &self.skip_first)
            .field("until_at_start", &self.until_at_start)
            .finish()
    }
}
