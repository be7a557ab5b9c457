#![forbid(unsafe_code)]

//! Observer protocol and subscriber bookkeeping.
//!
//! # Design
//!
//! A propagation wave is delivered in two phases. When a source cell is
//! about to change it announces [`Observer::will_update`] to every
//! observer; once the change is committed it announces
//! [`Observer::did_update`]. Intermediate cells forward both phases, so a
//! downstream observer reachable over several paths receives one
//! `will_update`/`did_update` pair per path.
//!
//! [`Wave`] turns that pairing into glitch freedom: an observer opens a
//! wave on the first `will_update` and acts only when the matching number
//! of `did_update`s has arrived, i.e. when every dependency path has
//! committed.
//!
//! Observers are stored as `Weak` references with per-observer
//! registration counts, in registration order. Dead entries are pruned
//! lazily during notification, mirroring the subscriber list of the
//! runtime's `Observable`.
//!
//! # Invariants
//!
//! 1. Observers are notified in registration order.
//! 2. `remove` must be called as many times as `add` before an observer
//!    actually leaves the list.
//! 3. A wave completes exactly once, when pending arrivals reach zero.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use crate::key::Key;

/// Receiver of propagation notifications.
pub trait Observer {
    /// The cell identified by `source` is about to change. Idempotent per
    /// wave: implementations must tolerate one call per dependency path.
    fn will_update(&self, source: &Key);

    /// The change announced by the matching `will_update` has been
    /// committed. `changed` is false when a changes-only cell recomputed
    /// to an equal value.
    fn did_update(&self, source: &Key, changed: bool);
}

/// Observer that does nothing. Used to keep a cell active without
/// reacting to it.
pub(crate) struct NoopObserver;

impl Observer for NoopObserver {
    fn will_update(&self, _source: &Key) {}
    fn did_update(&self, _source: &Key, _changed: bool) {}
}

struct Entry {
    observer: Weak<dyn Observer>,
    /// Data-pointer identity of the registered `Rc`, used for removal.
    addr: usize,
    count: usize,
}

fn addr_of(observer: &Rc<dyn Observer>) -> usize {
    Rc::as_ptr(observer) as *const () as usize
}

/// Ordered, refcounted list of weak observers.
#[derive(Default)]
pub(crate) struct ObserverList {
    entries: RefCell<Vec<Entry>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Register an observer, or bump its registration count.
    pub fn add(&self, observer: &Rc<dyn Observer>) {
        let addr = addr_of(observer);
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.iter_mut().find(|e| e.addr == addr) {
            entry.count += 1;
        } else {
            entries.push(Entry {
                observer: Rc::downgrade(observer),
                addr,
                count: 1,
            });
        }
    }

    /// Drop one registration of `observer`. Returns true when the
    /// observer's last registration was removed.
    pub fn remove(&self, observer: &Rc<dyn Observer>) -> bool {
        let addr = addr_of(observer);
        let mut entries = self.entries.borrow_mut();
        if let Some(pos) = entries.iter().position(|e| e.addr == addr) {
            if entries[pos].count > 1 {
                entries[pos].count -= 1;
                false
            } else {
                entries.remove(pos);
                true
            }
        } else {
            false
        }
    }

    /// Snapshot the live observers, pruning dead entries.
    fn live(&self) -> Vec<Rc<dyn Observer>> {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|e| e.observer.strong_count() > 0);
        entries.iter().filter_map(|e| e.observer.upgrade()).collect()
    }

    /// Announce phase one to every live observer.
    ///
    /// The observer snapshot is taken before any callback runs, so
    /// observers may add or remove registrations during delivery.
    pub fn notify_will(&self, source: &Key) {
        for observer in self.live() {
            observer.will_update(source);
        }
    }

    /// Announce phase two to every live observer.
    pub fn notify_did(&self, source: &Key, changed: bool) {
        for observer in self.live() {
            observer.did_update(source, changed);
        }
    }
}

/// Per-observer accounting of one propagation wave.
///
/// `arrive` is called from `will_update`, `depart` from `did_update`.
/// `depart` returns `Some(any_dependency_changed)` exactly when the wave
/// completes.
#[derive(Default)]
pub(crate) struct Wave {
    updating: StdCell<bool>,
    pending: StdCell<usize>,
    changed: StdCell<bool>,
}

impl Wave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_updating(&self) -> bool {
        self.updating.get()
    }

    /// Record one `will_update` arrival. Returns true when this arrival
    /// opened the wave.
    pub fn arrive(&self) -> bool {
        let first = !self.updating.get();
        if first {
            self.updating.set(true);
            self.pending.set(0);
            self.changed.set(false);
        }
        self.pending.set(self.pending.get() + 1);
        first
    }

    /// Record one `did_update` arrival. Returns `Some(changed)` when every
    /// pending arrival has been matched and the wave is complete.
    pub fn depart(&self, changed: bool) -> Option<bool> {
        if !self.updating.get() {
            return None;
        }
        debug_assert!(
            self.pending.get() > 0,
            "more did_update than will_update notifications in one wave"
        );
        self.pending.set(self.pending.get().saturating_sub(1));
        if changed {
            self.changed.set(true);
        }
        if self.pending.get() == 0 {
            self.updating.set(false);
            Some(self.changed.get())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
