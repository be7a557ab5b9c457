#![forbid(unsafe_code)]

//! The cell contract.
//!
//! # Design
//!
//! Cells are cheap `Clone` handles over shared interiors. The trait has
//! three concerns:
//!
//! - **Reading**: [`Cell::try_value`] is the plain, untracked read.
//!   [`Cell::call`] is the read used inside compute functions: it
//!   additionally records the cell as a dependency in the innermost
//!   tracking frame. [`Cell::value`] is the panicking convenience for
//!   reads that cannot fail.
//! - **Observation**: [`Cell::add_observer`] / [`Cell::remove_observer`].
//!   The first observer activates a stateful cell, the last removal
//!   deactivates it.
//! - **Erasure**: [`DynCell`] is the type-erased handle stored in
//!   dependency sets and passed through the tracking machinery.

use std::any::Any;
use std::rc::Rc;

use crate::error::CellResult;
use crate::key::Key;
use crate::observer::Observer;
use crate::tracking;

/// A reactive value holder.
pub trait Cell: Clone + 'static {
    /// Type of the held value.
    type Value: Clone + 'static;

    /// Stable identity of this cell.
    fn key(&self) -> Key;

    /// Read the current value without recording a dependency.
    ///
    /// For computed cells this triggers a lazy recomputation when the
    /// cached value is stale.
    fn try_value(&self) -> CellResult<Self::Value>;

    /// Register `observer` for change notifications. The first observer
    /// activates the cell.
    fn add_observer(&self, observer: &Rc<dyn Observer>);

    /// Unregister `observer`. Must be called as many times as
    /// `add_observer` was; removing the last registration deactivates the
    /// cell.
    fn remove_observer(&self, observer: &Rc<dyn Observer>);

    /// Type-erased handle to this cell.
    fn to_dyn(&self) -> DynCell {
        DynCell::new(self.clone())
    }

    /// Read the value and record this cell as a dependency of the
    /// currently running compute function.
    ///
    /// Inside a scheduled watch callback the read resolves against the
    /// value snapshot captured at scheduling time.
    fn call(&self) -> CellResult<Self::Value> {
        tracking::track(&self.to_dyn());
        if let Some(result) = tracking::snapshot_value::<Self::Value>(&self.key()) {
            return result;
        }
        self.try_value()
    }

    /// Read the value, panicking if the cell holds an error.
    ///
    /// # Panics
    ///
    /// Panics when `try_value` reports an error. Use [`Cell::try_value`]
    /// for cells whose computation can fail.
    fn value(&self) -> Self::Value {
        match self.try_value() {
            Ok(value) => value,
            Err(e) => panic!("cell value unavailable: {e}"),
        }
    }
}

/// Object-safe view of a cell, without its value type.
pub(crate) trait AnyCell {
    fn key(&self) -> Key;
    fn add_observer(&self, observer: &Rc<dyn Observer>);
    fn remove_observer(&self, observer: &Rc<dyn Observer>);
    /// Capture the current value as a type-erased snapshot.
    fn snapshot(&self) -> CellResult<Rc<dyn Any>>;
}

impl<C: Cell> AnyCell for C {
    fn key(&self) -> Key {
        Cell::key(self)
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        Cell::add_observer(self, observer);
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        Cell::remove_observer(self, observer);
    }

    fn snapshot(&self) -> CellResult<Rc<dyn Any>> {
        self.try_value().map(|v| Rc::new(v) as Rc<dyn Any>)
    }
}

/// Type-erased cell handle.
///
/// Dependency sets hold these; equality of the underlying cells is
/// equality of their keys.
#[derive(Clone)]
pub struct DynCell {
    key: Key,
    inner: Rc<dyn AnyCell>,
}

impl DynCell {
    pub(crate) fn new(cell: impl Cell) -> Self {
        Self {
            key: cell.key(),
            inner: Rc::new(cell),
        }
    }

    /// Identity of the wrapped cell.
    #[must_use]
    pub fn key(&self) -> Key {
        self.key.clone()
    }

    pub(crate) fn add_observer(&self, observer: &Rc<dyn Observer>) {
        self.inner.add_observer(observer);
    }

    pub(crate) fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        self.inner.remove_observer(observer);
    }

    pub(crate) fn snapshot(&self) -> CellResult<Rc<dyn Any>> {
        self.inner.snapshot()
    }
}

impl std::fmt::Debug for DynCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynCell").field(&self.key).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
