//! Node state and change detection.

use std::rc::Rc;

use crate::error::ReactiveError;

/// Pluggable equality used to decide whether a new value is a change.
pub type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Equality backed by `PartialEq`.
pub fn default_equality<T: PartialEq + 'static>() -> Equality<T> {
    Rc::new(|a: &T, b: &T| a == b)
}

/// The current state of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum State<T> {
    /// The node has a value.
    Resolved(T),

    /// The node has no value yet.
    Unresolved,

    /// The node is in an error state and re-raises this error on every read.
    Error(ReactiveError),
}

impl<T> State<T> {
    /// Convert an evaluation outcome into a state.
    ///
    /// `Err(Unresolved)` means "no value", not failure.
    pub fn from_result(result: Result<T, ReactiveError>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(ReactiveError::Unresolved) => Self::Unresolved,
            Err(error) => Self::Error(error),
        }
    }

    /// The value, or the error a read of this state raises.
    pub fn into_result(self) -> Result<T, ReactiveError> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::Unresolved => Err(ReactiveError::Unresolved),
            Self::Error(error) => Err(error),
        }
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl<T> From<Result<T, ReactiveError>> for State<T> {
    fn from(result: Result<T, ReactiveError>) -> Self {
        Self::from_result(result)
    }
}

/// Whether moving from `old` to `new` is a material change.
///
/// Errors always count as a change; an error raised twice is still news.
pub(crate) fn is_change<T>(equality: &Equality<T>, old: &State<T>, new: &State<T>) -> bool {
    match (old, new) {
        (State::Resolved(old), State::Resolved(new)) => !equality(old, new),
        (State::Unresolved, State::Unresolved) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_results_become_unresolved_state() {
        let state: State<i32> = State::from_result(Err(ReactiveError::Unresolved));
        assert!(state.is_unresolved());

        let state: State<i32> = Err(ReactiveError::msg("bad")).into();
        assert!(state.is_error());

        let state = State::from_result(Ok(3));
        assert_eq!(state.resolved(), Some(&3));
        assert_eq!(state.into_result(), Ok(3));
    }

    #[test]
    fn change_detection_uses_equality() {
        let eq = default_equality::<i32>();
        assert!(!is_change(&eq, &State::Resolved(1), &State::Resolved(1)));
        assert!(is_change(&eq, &State::Resolved(1), &State::Resolved(2)));
        assert!(!is_change(&eq, &State::Unresolved, &State::Unresolved));
        assert!(is_change(&eq, &State::Unresolved, &State::Resolved(1)));
        assert!(is_change(&eq, &State::Resolved(1), &State::Unresolved));

        let error = State::Error(ReactiveError::msg("bad"));
        assert!(is_change(&eq, &error, &error.clone()));
    }

    #[test]
    fn custom_equality_can_ignore_differences() {
        let eq: Equality<String> = Rc::new(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
        let old = State::Resolved("Hello".to_string());
        let new = State::Resolved("HELLO".to_string());
        assert!(!is_change(&eq, &old, &new));
    }
}
