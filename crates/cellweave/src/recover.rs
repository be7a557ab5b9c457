#![forbid(unsafe_code)]

//! Error-recovery cells.
//!
//! Computation errors propagate with the value: a cell reading an
//! erroring dependency stores and re-surfaces the same error. The two
//! recovery primitives below are the designated way out:
//!
//! - [`RecoverExt::on_error`] substitutes a fallback cell's value when
//!   the source errors.
//! - [`RecoverExt::error`] captures the last error as a value, for
//!   observing failures directly.
//!
//! Both produce keyed cells: recovering the same source with the same
//! fallback twice yields one shared cell.

use std::any::type_name;

use crate::cell::Cell;
use crate::computed::Computed;
use crate::error::{none_with, CapturedError, CellError};
use crate::key::{Key, KeyAtom};

/// Error-recovery operations available on every cell.
pub trait RecoverExt: Cell
where
    Self::Value: PartialEq,
{
    /// Cell evaluating to `fallback` whenever this cell's read fails.
    ///
    /// Any failure is caught, including pending wait-cell reads and an
    /// abort escaping an unobserved source. Use
    /// [`RecoverExt::on_error_of`] to catch one error type only.
    fn on_error<F>(&self, fallback: &F) -> Computed<Self::Value>
    where
        F: Cell<Value = Self::Value>,
    {
        let source = self.clone();
        let fallback = fallback.clone();
        Computed::with_key(
            Key::composite("on-error", vec![self.key(), fallback.key()]),
            move || match source.call() {
                Ok(value) => Ok(value),
                Err(_) => fallback.call(),
            },
        )
    }

    /// Cell evaluating to `fallback` when this cell's read fails with an
    /// error of type `E`. Other failures propagate unchanged.
    fn on_error_of<E, F>(&self, fallback: &F) -> Computed<Self::Value>
    where
        E: std::error::Error + 'static,
        F: Cell<Value = Self::Value>,
    {
        let source = self.clone();
        let fallback = fallback.clone();
        Computed::with_key(
            Key::composite_with(
                "on-error",
                vec![self.key(), fallback.key()],
                vec![KeyAtom::Str(type_name::<E>())],
            ),
            move || match source.call() {
                Ok(value) => Ok(value),
                Err(e) if e.downcast_ref::<E>().is_some() => fallback.call(),
                Err(e) => Err(e),
            },
        )
    }

    /// Cell holding the last error raised by this cell, or `None` before
    /// the first failure.
    ///
    /// With `all = false` the captured error is held across successful
    /// recomputations; with `all = true` a successful recomputation
    /// clears the cell back to `None`.
    fn error(&self, all: bool) -> Computed<Option<CapturedError>> {
        let source = self.clone();
        Computed::with_key(
            Key::composite_with("error", vec![self.key()], vec![KeyAtom::Bool(all)]),
            move || match source.call() {
                Err(CellError::Failed(e)) => Ok(Some(CapturedError(e))),
                _ if all => Ok(None),
                // Hold the previous capture; before any failure the cell
                // reads as None.
                _ => Err(none_with(None::<CapturedError>)),
            },
        )
        .changes_only()
    }

    /// Like [`RecoverExt::error`], but only captures errors of type `E`.
    fn error_of<E>(&self, all: bool) -> Computed<Option<CapturedError>>
    where
        E: std::error::Error + 'static,
    {
        let source = self.clone();
        Computed::with_key(
            Key::composite_with(
                "error",
                vec![self.key()],
                vec![KeyAtom::Bool(all), KeyAtom::Str(type_name::<E>())],
            ),
            move || match source.call() {
                Err(CellError::Failed(e)) if e.is::<E>() => Ok(Some(CapturedError(e))),
                _ if all => Ok(None),
                _ => Err(none_with(None::<CapturedError>)),
            },
        )
        .changes_only()
    }
}

impl<C: Cell> RecoverExt for C where C::Value: PartialEq {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
