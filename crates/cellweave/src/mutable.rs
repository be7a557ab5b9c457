#![forbid(unsafe_code)]

//! Writable leaf cells.
//!
//! # Design
//!
//! `Mutable<T>` is the writable source of every propagation wave. A write
//! that actually changes the value (by `PartialEq`) announces
//! `will_update` to all observers, commits, then announces
//! `did_update(changed = true)`; inside a batch, it instead enrolls the
//! cell for a deferred `did_update` at the end of the scope. Setting an
//! equal value is a no-op.
//!
//! The state is persistent: the stored value survives the cell losing all
//! its observers.
//!
//! # Invariants
//!
//! 1. `set(v)` with `v == current` emits no notifications.
//! 2. Per batch, a cell announces `will_update` at most once and receives
//!    exactly one flush `did_update`, regardless of how many times it was
//!    written.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use crate::batch::{self, FlushCell};
use crate::cell::Cell;
use crate::error::CellResult;
use crate::key::Key;
use crate::observer::Observer;
use crate::state::{attach, detach, CellState, StateCore};

/// A writable cell.
///
/// Cloning the handle shares the underlying storage.
pub struct Mutable<T: Clone + PartialEq + 'static> {
    state: Rc<MutableState<T>>,
}

struct MutableState<T> {
    core: StateCore,
    value: RefCell<T>,
    /// Whether this cell already announced `will_update` in the current
    /// batch.
    batched: StdCell<bool>,
}

impl<T: Clone + PartialEq + 'static> CellState for MutableState<T> {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn persistent(&self) -> bool {
        true
    }
}

impl<T: Clone + PartialEq + 'static> FlushCell for MutableState<T> {
    fn flush(&self) {
        self.batched.set(false);
        self.core.notify_did_update(true);
    }
}

impl<T: Clone + PartialEq + 'static> Mutable<T> {
    /// Create a mutable cell initialized to `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            state: Rc::new(MutableState {
                core: StateCore::new(Key::unique()),
                value: RefCell::new(value),
                batched: StdCell::new(false),
            }),
        }
    }

    /// Set the cell's value, notifying observers if it changed.
    pub fn set(&self, value: T) {
        let state = &self.state;
        if *state.value.borrow() == value {
            return;
        }
        if batch::in_batch() {
            if !state.batched.get() {
                state.core.notify_will_update();
                state.batched.set(true);
                batch::enroll(state.clone());
            }
            *state.value.borrow_mut() = value;
        } else {
            state.core.notify_will_update();
            *state.value.borrow_mut() = value;
            state.core.notify_did_update(true);
        }
    }

    /// Modify the value in place. Observers are notified only when the
    /// result differs from the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.state.value.borrow().clone();
        f(&mut next);
        self.set(next);
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Mutable<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Mutable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutable")
            .field("value", &*self.state.value.borrow())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Cell for Mutable<T> {
    type Value = T;

    fn key(&self) -> Key {
        self.state.core.key().clone()
    }

    fn try_value(&self) -> CellResult<T> {
        Ok(self.state.value.borrow().clone())
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        attach(&self.state, observer);
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        detach(&self.state, observer);
    }
}

/// Create a mutable cell initialized to `value`.
#[must_use]
pub fn mutable<T: Clone + PartialEq + 'static>(v: T) -> Mutable<T> {
    Mutable::new(v)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
