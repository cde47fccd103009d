//! Actions control the traversal of a program.
use dass_utils::DassResult;

/// Result of performing a visit.
pub type VisResult = DassResult<Action>;

/// Action performed at the end of visiting a function.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Continue with the next step of the traversal.
    Continue,
    /// Skip the rest of the current function. The remaining functions are
    /// still visited.
    Stop,
}

impl Action {
    /// Run the traversal specified by `next` if this traversal succeeds.
    /// If the result of this traversal is not `Action::Continue`, do not
    /// run `next()`.
    pub(super) fn and_then<F>(self, mut next: F) -> VisResult
    where
        F: FnMut() -> VisResult,
    {
        match self {
            Action::Continue => next(),
            Action::Stop => Ok(self),
        }
    }
}
