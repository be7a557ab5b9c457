#![forbid(unsafe_code)]

//! Error model for cell computations.
//!
//! A cell read either yields a value or a [`CellError`]. Errors are shared
//! (`Rc`) so that a single failure can be cached by the erroring cell and
//! re-surfaced to every reader until the next successful recomputation.
//!
//! The abort sentinel ([`none`] / [`none_with`]) is a distinguished variant
//! rather than an ordinary error: a computed cell recognizes it and keeps
//! its previous value instead of storing a failure.

use std::any::Any;
use std::rc::Rc;

use thiserror::Error;

/// Shared dynamic error, cloneable across cells.
pub type DynError = Rc<dyn std::error::Error + 'static>;

/// Result of a cell read or computation.
pub type CellResult<T> = Result<T, CellError>;

/// Why a cell read did not produce a value.
#[derive(Clone)]
pub enum CellError {
    /// Abort sentinel: the computed cell keeps its previous value. Carries
    /// an optional default used when there is no previous value.
    Abort(Option<Rc<dyn Any>>),
    /// A computation failed; the error is cached and re-surfaced on every
    /// read until the cell recomputes successfully.
    Failed(DynError),
}

impl CellError {
    /// Wrap an ordinary error.
    pub fn failed(error: impl std::error::Error + 'static) -> Self {
        CellError::Failed(Rc::new(error))
    }

    /// The pending marker reported by a wait cell whose future has not
    /// completed.
    #[must_use]
    pub fn pending() -> Self {
        CellError::failed(PendingError)
    }

    /// Error reported when a cell is read before it ever held a value.
    #[must_use]
    pub fn uninitialized() -> Self {
        CellError::failed(UninitializedError)
    }

    /// Is this the abort sentinel?
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, CellError::Abort(_))
    }

    /// Is this the pending marker of a wait cell?
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, CellError::Failed(e) if e.is::<PendingError>())
    }

    /// Downcast the wrapped failure to a concrete error type.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            CellError::Failed(e) => e.downcast_ref::<E>(),
            CellError::Abort(_) => None,
        }
    }
}

impl std::fmt::Debug for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellError::Abort(default) => f
                .debug_struct("Abort")
                .field("has_default", &default.is_some())
                .finish(),
            CellError::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellError::Abort(_) => write!(f, "computation aborted, previous value retained"),
            CellError::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Reading a wait cell before its current future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("async cell value is still pending")]
pub struct PendingError;

/// Reading a cell that never held a value (e.g. an inactive wait cell, or
/// a computation that aborted before producing anything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cell accessed before it was initialized")]
pub struct UninitializedError;

/// Abort the current computation, keeping the cell's previous value.
///
/// Only meaningful inside a compute function: `return Err(none())`.
#[must_use]
pub fn none() -> CellError {
    CellError::Abort(None)
}

/// Abort the current computation; if the cell has no previous value yet,
/// initialize it to `default`.
#[must_use]
pub fn none_with<T: 'static>(default: T) -> CellError {
    CellError::Abort(Some(Rc::new(default)))
}

/// An error captured as a cell value by `error()` cells.
///
/// Compares by identity of the shared error, which is what a downstream
/// cell needs: a fresh failure is a change, re-reading the same cached
/// failure is not.
#[derive(Clone)]
pub struct CapturedError(pub DynError);

impl CapturedError {
    /// Downcast to the concrete error type.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl PartialEq for CapturedError {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CapturedError").field(&self.0).finish()
    }
}

impl std::fmt::Display for CapturedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether two computation outcomes are observably equal.
///
/// Failures never compare equal: an error outcome always counts as a
/// change for changes-only suppression.
pub(crate) fn outcome_eq<T: PartialEq>(a: &CellResult<T>, b: &CellResult<T>) -> bool {
    match (a, b) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn pending_is_recognized() {
        assert!(CellError::pending().is_pending());
        assert!(!CellError::failed(Boom).is_pending());
        assert!(!none().is_pending());
    }

    #[test]
    fn abort_is_recognized() {
        assert!(none().is_abort());
        assert!(none_with(42).is_abort());
        assert!(!CellError::failed(Boom).is_abort());
    }

    #[test]
    fn downcast_finds_concrete_type() {
        let e = CellError::failed(Boom);
        assert!(e.downcast_ref::<Boom>().is_some());
        assert!(e.downcast_ref::<PendingError>().is_none());
    }

    #[test]
    fn captured_error_identity_equality() {
        let shared: DynError = Rc::new(Boom);
        let a = CapturedError(shared.clone());
        let b = CapturedError(shared);
        let c = CapturedError(Rc::new(Boom));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn outcome_eq_errors_always_differ() {
        let ok: CellResult<i32> = Ok(1);
        let same: CellResult<i32> = Ok(1);
        let other: CellResult<i32> = Ok(2);
        let err: CellResult<i32> = Err(CellError::pending());

        assert!(outcome_eq(&ok, &same));
        assert!(!outcome_eq(&ok, &other));
        assert!(!outcome_eq(&ok, &err));
        assert!(!outcome_eq(&err, &err.clone()));
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            CellError::pending().to_string(),
            "async cell value is still pending"
        );
        assert!(none().to_string().contains("aborted"));
    }
}
