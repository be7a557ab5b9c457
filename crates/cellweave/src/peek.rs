#![forbid(unsafe_code)]

//! Peek cells: liveness without notifications.
//!
//! A peek cell reads through to its target but never forwards the
//! target's change notifications. While the peek cell is active it holds
//! one internal no-op observer on the target, keeping the target active
//! in turn. A computed cell reading via `peek` therefore keeps the target
//! warm without being recomputed by its writes.
//!
//! Peek cells are keyed on their target: every peek of the same cell
//! shares one state and thus one keeper observer.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::{Cell, DynCell};
use crate::error::CellResult;
use crate::key::Key;
use crate::observer::{NoopObserver, Observer};
use crate::state::{attach, detach, CellState, StateCore, StateSlot};

/// A cell with the same value as its target that never notifies.
pub struct Peek<C: Cell> {
    inner: Rc<PeekInner<C>>,
}

struct PeekInner<C: Cell> {
    key: Key,
    target: C,
    slot: StateSlot<PeekState>,
}

struct PeekState {
    core: StateCore,
    target: DynCell,
    keeper: RefCell<Option<Rc<dyn Observer>>>,
}

impl CellState for PeekState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn init(self: Rc<Self>) {
        let keeper: Rc<dyn Observer> = Rc::new(NoopObserver);
        self.target.add_observer(&keeper);
        *self.keeper.borrow_mut() = Some(keeper);
    }

    fn dispose(self: Rc<Self>) {
        if let Some(keeper) = self.keeper.borrow_mut().take() {
            self.target.remove_observer(&keeper);
        }
    }
}

impl<C: Cell> Peek<C> {
    /// Create a peek over `target`.
    #[must_use]
    pub fn new(target: C) -> Self {
        Self {
            inner: Rc::new(PeekInner {
                key: Key::composite("peek", vec![target.key()]),
                target,
                slot: StateSlot::new(),
            }),
        }
    }

    fn ensure_state(&self) -> Rc<PeekState> {
        let inner = &self.inner;
        inner.slot.ensure(&inner.key, || {
            Rc::new(PeekState {
                core: StateCore::new(inner.key.clone()),
                target: inner.target.to_dyn(),
                keeper: RefCell::new(None),
            })
        })
    }
}

impl<C: Cell> Clone for Peek<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Cell> std::fmt::Debug for Peek<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Peek").field(&self.inner.key).finish()
    }
}

impl<C: Cell> Cell for Peek<C> {
    type Value = C::Value;

    fn key(&self) -> Key {
        self.inner.key.clone()
    }

    fn try_value(&self) -> CellResult<C::Value> {
        self.inner.target.try_value()
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        attach(&self.ensure_state(), observer);
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        if let Some(state) = self.inner.slot.get(&self.inner.key) {
            detach(&state, observer);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
