#![forbid(unsafe_code)]

//! The compute-state engine behind computed cells.
//!
//! # Design
//!
//! [`ComputeState`] owns everything an active computed cell needs: the
//! cached outcome, the staleness flag, the dynamically discovered
//! dependency set, and the wave accounting that makes propagation
//! glitch-free.
//!
//! Recomputation is lazy. A wave marks the state stale and forwards the
//! notifications; the compute function runs again only when the value is
//! actually read (or eagerly, for changes-only cells, which must compare
//! the fresh value against the old one to decide what to report).
//!
//! Each run re-discovers the dependency set: reads are recorded into a
//! per-run set, newly referenced cells are subscribed to immediately, and
//! cells the run no longer referenced are unsubscribed afterwards.
//!
//! # Failure Modes
//!
//! - **Compute returns an error**: the error is cached and re-surfaced on
//!   every read until a later run succeeds; observers are notified with
//!   `changed = true`.
//! - **Compute aborts** (`none()` / `none_with`): the previous outcome is
//!   retained. On the very first run the sentinel's default becomes the
//!   value; without a default the cell reads as uninitialized.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};

use crate::cell::DynCell;
use crate::error::{outcome_eq, CellError, CellResult};
use crate::key::Key;
use crate::observer::{Observer, Wave};
use crate::state::{CellState, StateCore};
use crate::tracking::{self, TrackFn};

pub(crate) struct ComputeState<T: Clone + PartialEq + 'static> {
    core: StateCore,
    this: Weak<ComputeState<T>>,
    compute: Rc<dyn Fn() -> CellResult<T>>,
    changes_only: bool,
    deps: RefCell<AHashMap<Key, DynCell>>,
    cached: RefCell<Option<CellResult<T>>>,
    stale: StdCell<bool>,
    wave: Wave,
    /// Pre-wave outcome snapshot, kept only for changes-only comparison.
    old: RefCell<Option<CellResult<T>>>,
}

impl<T: Clone + PartialEq + 'static> ComputeState<T> {
    pub fn new(
        key: Key,
        compute: Rc<dyn Fn() -> CellResult<T>>,
        changes_only: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            core: StateCore::new(key),
            this: this.clone(),
            compute,
            changes_only,
            deps: RefCell::new(AHashMap::new()),
            cached: RefCell::new(None),
            stale: StdCell::new(true),
            wave: Wave::new(),
            old: RefCell::new(None),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn Observer>> {
        self.this.upgrade().map(|rc| rc as Rc<dyn Observer>)
    }

    /// Current outcome, recomputing first if the cache is stale.
    pub fn value_result(&self) -> CellResult<T> {
        if self.stale.get() {
            self.recompute();
        }
        self.cached
            .borrow()
            .clone()
            .unwrap_or_else(|| Err(CellError::uninitialized()))
    }

    #[cfg(test)]
    pub fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Run the compute function under a fresh tracking frame, then diff
    /// the discovered dependency set against the previous one.
    fn recompute(&self) {
        let run: Rc<RefCell<AHashSet<Key>>> = Rc::new(RefCell::new(AHashSet::new()));

        let tracker: TrackFn = {
            let run = run.clone();
            let this = self.this.clone();
            Rc::new(move |cell: &DynCell| {
                let key = cell.key();
                if !run.borrow_mut().insert(key.clone()) {
                    return;
                }
                let Some(state) = this.upgrade() else { return };
                let known = state.deps.borrow().contains_key(&key);
                if !known {
                    state.deps.borrow_mut().insert(key, cell.clone());
                    if let Some(observer) = state.as_observer() {
                        cell.add_observer(&observer);
                    }
                }
            })
        };

        let outcome = tracking::with_tracker(tracker, || (self.compute)());

        // Unsubscribe from dependencies this run no longer referenced.
        let run = run.borrow();
        let dropped: Vec<DynCell> = {
            let mut deps = self.deps.borrow_mut();
            let gone: Vec<Key> = deps.keys().filter(|k| !run.contains(*k)).cloned().collect();
            gone.iter().filter_map(|k| deps.remove(k)).collect()
        };
        if let Some(observer) = self.as_observer() {
            for dep in dropped {
                dep.remove_observer(&observer);
            }
        }

        let mut cached = self.cached.borrow_mut();
        match outcome {
            Ok(value) => *cached = Some(Ok(value)),
            Err(CellError::Abort(default)) => {
                if cached.is_none() {
                    *cached = Some(match default {
                        Some(value) => match value.downcast::<T>() {
                            Ok(v) => Ok((*v).clone()),
                            Err(_) => Err(CellError::uninitialized()),
                        },
                        None => Err(CellError::uninitialized()),
                    });
                }
            }
            Err(e) => *cached = Some(Err(e)),
        }
        self.stale.set(false);
    }

    /// What to report as `changed` once the current wave completes.
    fn report_changed(&self) -> bool {
        if !self.changes_only {
            return true;
        }
        // Changes-only forces the recomputation now: the fresh outcome is
        // compared against the pre-wave snapshot.
        let fresh = self.value_result();
        match self.old.borrow().as_ref() {
            Some(old) => !outcome_eq(&fresh, old),
            None => true,
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observer for ComputeState<T> {
    fn will_update(&self, _source: &Key) {
        if self.wave.arrive() {
            if self.changes_only {
                let current = self.value_result();
                *self.old.borrow_mut() = Some(current);
            }
            self.core.notify_will_update();
            self.stale.set(true);
        }
    }

    fn did_update(&self, _source: &Key, changed: bool) {
        if let Some(any_changed) = self.wave.depart(changed) {
            let report = any_changed && self.report_changed();
            self.core.notify_did_update(report);
            if any_changed && self.changes_only {
                *self.old.borrow_mut() = None;
            }
        }
    }
}

impl<T: Clone + PartialEq + 'static> CellState for ComputeState<T> {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn init(self: Rc<Self>) {
        // Activation runs the compute once: dependencies are discovered
        // and subscribed before the first observer is registered.
        let _ = self.value_result();
    }

    fn dispose(self: Rc<Self>) {
        let observer: Rc<dyn Observer> = self.clone();
        let deps: Vec<DynCell> = self.deps.borrow_mut().drain().map(|(_, dep)| dep).collect();
        for dep in deps {
            dep.remove_observer(&observer);
        }
    }
}
