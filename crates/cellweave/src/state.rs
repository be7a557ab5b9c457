#![forbid(unsafe_code)]

//! Cell state lifecycle and the shared-state registry.
//!
//! # Design
//!
//! Stateful cells keep their runtime state (observer list, cache,
//! subscriptions) in a separate state object. The state is created when
//! the first observer arrives and disposed when the last one leaves;
//! between those points the cell is *active*.
//!
//! States of cells with a composite key live in a per-thread registry
//! keyed by that key, so structurally equal cells resolve to the same
//! state object: equal expressions share observers and caches while
//! active. Unique-keyed cells never share.
//!
//! # Invariants
//!
//! 1. `init` runs before the first observer is registered; `dispose` runs
//!    after the last registration is removed.
//! 2. A disposed state is never reused; handles re-resolve and create a
//!    fresh state on the next activation.
//! 3. The registry never holds a disposed state.

use std::any::Any;
use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;

use crate::key::Key;
use crate::observer::{Observer, ObserverList};

/// Bookkeeping shared by every cell state: identity, observers, disposal.
pub(crate) struct StateCore {
    key: Key,
    observers: ObserverList,
    disposed: StdCell<bool>,
}

impl StateCore {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            observers: ObserverList::new(),
            disposed: StdCell::new(false),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Announce phase one of a wave originating at this cell.
    pub fn notify_will_update(&self) {
        debug_assert!(!self.is_disposed(), "notification from a disposed state");
        self.observers.notify_will(&self.key);
    }

    /// Announce phase two of a wave originating at this cell.
    pub fn notify_did_update(&self, changed: bool) {
        debug_assert!(!self.is_disposed(), "notification from a disposed state");
        self.observers.notify_did(&self.key, changed);
    }
}

/// Behavior hooks of a concrete cell state.
pub(crate) trait CellState: Any {
    fn core(&self) -> &StateCore;

    /// Called before the first observer is registered.
    fn init(self: Rc<Self>) {}

    /// Called after the last observer registration is removed.
    fn dispose(self: Rc<Self>) {}

    /// Persistent states (mutable cells) survive losing their observers
    /// and are never disposed.
    fn persistent(&self) -> bool {
        false
    }
}

/// Register an observer on `state`, activating it if this is the first.
pub(crate) fn attach<S: CellState>(state: &Rc<S>, observer: &Rc<dyn Observer>) {
    debug_assert!(!state.core().is_disposed(), "observer added to disposed state");
    if !state.core().has_observers() {
        tracing::trace!(key = ?state.core().key(), "cell activated");
        state.clone().init();
    }
    state.core().observers.add(observer);
}

/// Remove an observer registration, deactivating `state` when it was the
/// last one.
pub(crate) fn detach<S: CellState>(state: &Rc<S>, observer: &Rc<dyn Observer>) {
    if state.core().is_disposed() {
        return;
    }
    if state.core().observers.remove(observer)
        && !state.core().has_observers()
        && !state.persistent()
    {
        tracing::trace!(key = ?state.core().key(), "cell deactivated");
        state.core().disposed.set(true);
        if state.core().key().is_shared() {
            remove_shared(state.core().key());
        }
        state.clone().dispose();
    }
}

thread_local! {
    static REGISTRY: RefCell<AHashMap<Key, Rc<dyn Any>>> = RefCell::new(AHashMap::new());
}

/// Resolve the shared state for `key`, creating it if absent.
pub(crate) fn shared_or_create<S: CellState>(key: &Key, create: impl FnOnce() -> Rc<S>) -> Rc<S> {
    debug_assert!(key.is_shared());
    let existing = REGISTRY.with(|registry| registry.borrow().get(key).cloned());
    if let Some(existing) = existing {
        match existing.downcast::<S>() {
            Ok(state) if !state.core().is_disposed() => return state,
            Ok(_) => {}
            Err(_) => debug_assert!(false, "shared-state key collision across cell types"),
        }
    }
    let state = create();
    REGISTRY.with(|registry| {
        registry
            .borrow_mut()
            .insert(key.clone(), state.clone() as Rc<dyn Any>)
    });
    state
}

/// Resolve the shared state for `key` without creating it.
pub(crate) fn shared_get<S: CellState>(key: &Key) -> Option<Rc<S>> {
    let existing = REGISTRY.with(|registry| registry.borrow().get(key).cloned())?;
    let state = existing.downcast::<S>().ok()?;
    (!state.core().is_disposed()).then_some(state)
}

fn remove_shared(key: &Key) {
    REGISTRY.with(|registry| {
        registry.borrow_mut().remove(key);
    });
}

/// Per-handle cache of a cell's resolved state.
///
/// Handles of the same keyed cell each carry a slot; the slot lazily
/// re-resolves through the registry whenever its cached state has been
/// disposed elsewhere.
pub(crate) struct StateSlot<S> {
    cached: RefCell<Option<Rc<S>>>,
}

impl<S: CellState> StateSlot<S> {
    pub fn new() -> Self {
        Self {
            cached: RefCell::new(None),
        }
    }

    fn cached_live(&self) -> Option<Rc<S>> {
        let cached = self.cached.borrow();
        cached
            .as_ref()
            .filter(|state| !state.core().is_disposed())
            .cloned()
    }

    /// Current state, creating it if necessary.
    pub fn ensure(&self, key: &Key, create: impl FnOnce() -> Rc<S>) -> Rc<S> {
        if let Some(state) = self.cached_live() {
            return state;
        }
        let state = if key.is_shared() {
            shared_or_create(key, create)
        } else {
            create()
        };
        *self.cached.borrow_mut() = Some(state.clone());
        state
    }

    /// Current state, if one exists.
    pub fn get(&self, key: &Key) -> Option<Rc<S>> {
        if let Some(state) = self.cached_live() {
            return Some(state);
        }
        if key.is_shared() {
            if let Some(state) = shared_get::<S>(key) {
                *self.cached.borrow_mut() = Some(state.clone());
                return Some(state);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
