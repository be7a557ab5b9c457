#![forbid(unsafe_code)]

//! Computed cells with dynamically discovered dependencies.
//!
//! A computed cell runs a compute function that reads other cells through
//! [`Cell::call`]; every cell read that way becomes a dependency of the
//! current run. The dependency set may differ between runs: only the
//! branch actually taken is subscribed to.
//!
//! While inactive (no observers) the cell has no state: reads run the
//! compute function directly, without subscribing to anything. The first
//! observer activates the cell, runs the compute once and subscribes to
//! the discovered dependencies.

use std::cell::Cell as StdCell;
use std::rc::Rc;

use crate::cell::Cell;
use crate::compute::ComputeState;
use crate::error::CellResult;
use crate::key::Key;
use crate::observer::Observer;
use crate::state::{attach, detach, StateSlot};
use crate::tracking;

/// A derived cell whose value is computed from the cells its compute
/// function reads.
pub struct Computed<T: Clone + PartialEq + 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T: Clone + PartialEq + 'static> {
    key: Key,
    compute: Rc<dyn Fn() -> CellResult<T>>,
    changes_only: StdCell<bool>,
    slot: StateSlot<ComputeState<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed cell with a fresh identity.
    pub fn new(compute: impl Fn() -> CellResult<T> + 'static) -> Self {
        Self::with_key(Key::unique(), compute)
    }

    /// Create a computed cell identified by `key`. Cells with equal
    /// composite keys share state while active.
    pub fn with_key(key: Key, compute: impl Fn() -> CellResult<T> + 'static) -> Self {
        Self {
            inner: Rc::new(ComputedInner {
                key,
                compute: Rc::new(compute),
                changes_only: StdCell::new(false),
                slot: StateSlot::new(),
            }),
        }
    }

    /// Only report `changed = true` to observers when the recomputed
    /// value differs from the previous one.
    ///
    /// Must be configured before the cell is first observed.
    #[must_use]
    pub fn changes_only(self) -> Self {
        self.inner.changes_only.set(true);
        self
    }

    fn ensure_state(&self) -> Rc<ComputeState<T>> {
        let inner = &self.inner;
        inner.slot.ensure(&inner.key, || {
            ComputeState::new(
                inner.key.clone(),
                inner.compute.clone(),
                inner.changes_only.get(),
            )
        })
    }

    fn state(&self) -> Option<Rc<ComputeState<T>>> {
        self.inner.slot.get(&self.inner.key)
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("key", &self.inner.key)
            .field("active", &self.state().is_some())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Cell for Computed<T> {
    type Value = T;

    fn key(&self) -> Key {
        self.inner.key.clone()
    }

    fn try_value(&self) -> CellResult<T> {
        match self.state() {
            Some(state) => state.value_result(),
            // Inactive: run the compute without subscribing. The nested
            // frame shields the caller's tracking frame from the reads
            // inside the compute function.
            None => tracking::untracked(|| (self.inner.compute)()),
        }
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        attach(&self.ensure_state(), observer);
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        if let Some(state) = self.state() {
            detach(&state, observer);
        }
    }
}

/// Create a computed cell from a compute function.
///
/// Cells read with [`Cell::call`] inside `compute` are tracked as
/// dependencies.
pub fn computed<T: Clone + PartialEq + 'static>(
    compute: impl Fn() -> CellResult<T> + 'static,
) -> Computed<T> {
    Computed::new(compute)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::constant::value;
    use crate::error::{none, none_with, CellError};
    use crate::key::Key;
    use crate::mutable::mutable;
    use crate::observer::Wave;
    use crate::state::CellState as _;
    use std::cell::{Cell as StdCell, RefCell};

    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("mock failure")]
    struct MockError;

    /// Records the observed cell's value each time a wave completes with
    /// an actual change.
    struct ValueObserver<C: Cell> {
        cell: C,
        wave: Wave,
        seen: RefCell<Vec<C::Value>>,
    }

    impl<C: Cell> ValueObserver<C> {
        fn new(cell: C) -> Rc<Self> {
            Rc::new(Self {
                cell,
                wave: Wave::new(),
                seen: RefCell::new(Vec::new()),
            })
        }
    }

    impl<C: Cell> Observer for ValueObserver<C> {
        fn will_update(&self, _source: &Key) {
            self.wave.arrive();
        }
        fn did_update(&self, _source: &Key, changed: bool) {
            if let Some(true) = self.wave.depart(changed) {
                if let Ok(v) = self.cell.try_value() {
                    self.seen.borrow_mut().push(v);
                }
            }
        }
    }

    fn observe<C: Cell>(cell: &C) -> (Rc<ValueObserver<C>>, Rc<dyn Observer>) {
        let recorder = ValueObserver::new(cell.clone());
        let observer: Rc<dyn Observer> = recorder.clone();
        cell.add_observer(&observer);
        (recorder, observer)
    }

    #[test]
    fn function_of_constant() {
        let a = value(1);
        let b = computed(move || Ok(a.call()? + 1));
        assert_eq!(b.value(), 2);
    }

    #[test]
    fn recomputes_on_argument_change() {
        let a = mutable(1);
        let a2 = a.clone();
        let b = computed(move || Ok(a2.call()? + 1));

        let (recorder, observer) = observe(&b);

        a.set(5);
        a.set(10);

        assert_eq!(*recorder.seen.borrow(), vec![6, 11]);
        b.remove_observer(&observer);
    }

    #[test]
    fn tracks_both_arguments() {
        let a = mutable(1);
        let b = mutable(1);
        let (a2, b2) = (a.clone(), b.clone());
        let c = computed(move || Ok(a2.call()? + b2.call()?));

        let (recorder, observer) = observe(&c);

        a.set(5);
        b.set(8);
        a.set(100);

        assert_eq!(*recorder.seen.borrow(), vec![6, 13, 108]);
        c.remove_observer(&observer);
    }

    #[test]
    fn conditional_dependencies_diffed() {
        let switch = mutable(true);
        let left = mutable(2);
        let right = mutable(3);

        let (s2, l2, r2) = (switch.clone(), left.clone(), right.clone());
        let d = computed(move || {
            if s2.call()? {
                l2.call()
            } else {
                r2.call()
            }
        });

        let (recorder, observer) = observe(&d);
        let state = d.state().unwrap();
        assert_eq!(state.dep_count(), 2); // switch + left

        left.set(1);
        switch.set(false);
        assert_eq!(state.dep_count(), 2); // switch + right

        // Writes to the dropped branch no longer recompute.
        left.set(99);
        right.set(10);

        assert_eq!(*recorder.seen.borrow(), vec![1, 3, 10]);
        d.remove_observer(&observer);
    }

    #[test]
    fn computed_of_computed() {
        let a = mutable(true);
        let b = mutable(2);
        let c = mutable(3);

        let (a2, b2, c2) = (a.clone(), b.clone(), c.clone());
        let d = computed(move || if a2.call()? { b2.call() } else { c2.call() });

        let e = mutable(0);
        let (d2, e2) = (d.clone(), e.clone());
        let f = computed(move || Ok(d2.call()? + e2.call()?));

        let (recorder, observer) = observe(&f);

        b.set(1);
        e.set(10);
        a.set(false);
        c.set(10);

        assert_eq!(*recorder.seen.borrow(), vec![1, 11, 13, 20]);
        f.remove_observer(&observer);
    }

    #[test]
    fn inactive_read_does_not_subscribe() {
        let a = mutable(1);
        let computes = Rc::new(StdCell::new(0u32));

        let (a2, n) = (a.clone(), computes.clone());
        let b = computed(move || {
            n.set(n.get() + 1);
            Ok(a2.call()? * 2)
        });

        assert_eq!(b.value(), 2);
        assert_eq!(computes.get(), 1);

        // Not observed: every write is invisible, every read recomputes.
        a.set(3);
        assert_eq!(b.value(), 6);
        assert_eq!(computes.get(), 2);
    }

    #[test]
    fn active_cell_caches_between_changes() {
        let a = mutable(1);
        let computes = Rc::new(StdCell::new(0u32));

        let (a2, n) = (a.clone(), computes.clone());
        let b = computed(move || {
            n.set(n.get() + 1);
            Ok(a2.call()? * 2)
        });

        let (_recorder, observer) = observe(&b);
        assert_eq!(computes.get(), 1); // activation run

        assert_eq!(b.value(), 2);
        assert_eq!(b.value(), 2);
        assert_eq!(computes.get(), 1); // cached

        a.set(4);
        assert_eq!(b.value(), 8);

        b.remove_observer(&observer);
    }

    #[test]
    fn errors_are_cached_and_resurfaced() {
        let a = mutable(1);
        let a2 = a.clone();
        let b = computed(move || {
            let v = a2.call()?;
            if v < 0 {
                Err(CellError::failed(MockError))
            } else {
                Ok(v)
            }
        });

        let (_recorder, observer) = observe(&b);

        a.set(-1);
        assert!(b.try_value().is_err());
        assert!(b.try_value().unwrap_err().downcast_ref::<MockError>().is_some());

        a.set(7);
        assert_eq!(b.try_value().ok(), Some(7));

        b.remove_observer(&observer);
    }

    #[test]
    fn abort_retains_previous_value() {
        let a = mutable(4);
        let a2 = a.clone();
        let b = computed(move || {
            let v = a2.call()?;
            if v < 10 {
                Ok(v)
            } else {
                Err(none())
            }
        });

        let (recorder, observer) = observe(&b);

        a.set(6);
        a.set(15); // aborts, keeps 6
        a.set(8);

        assert_eq!(*recorder.seen.borrow(), vec![6, 6, 8]);
        b.remove_observer(&observer);
    }

    #[test]
    fn abort_default_initializes_first_value() {
        let a = mutable(20);
        let a2 = a.clone();
        let b = computed(move || {
            let v = a2.call()?;
            if v < 10 {
                Ok(v)
            } else {
                Err(none_with(-1))
            }
        });

        let (_recorder, observer) = observe(&b);
        assert_eq!(b.try_value().ok(), Some(-1));

        a.set(3);
        assert_eq!(b.try_value().ok(), Some(3));

        b.remove_observer(&observer);
    }

    #[test]
    fn abort_without_default_reads_uninitialized() {
        let b: Computed<i32> = computed(|| Err(none()));
        let (_recorder, observer) = observe(&b);

        let err = b.try_value().unwrap_err();
        assert!(err
            .downcast_ref::<crate::error::UninitializedError>()
            .is_some());

        b.remove_observer(&observer);
    }

    #[test]
    fn changes_only_suppresses_equal_values() {
        let a = mutable(1);
        let a2 = a.clone();
        let parity = computed(move || Ok(a2.call()? % 2)).changes_only();

        let fired = Rc::new(StdCell::new(0u32));

        struct ChangeCounter {
            wave: Wave,
            fired: Rc<StdCell<u32>>,
        }
        impl Observer for ChangeCounter {
            fn will_update(&self, _source: &Key) {
                self.wave.arrive();
            }
            fn did_update(&self, _source: &Key, changed: bool) {
                if let Some(true) = self.wave.depart(changed) {
                    self.fired.set(self.fired.get() + 1);
                }
            }
        }

        let counter: Rc<dyn Observer> = Rc::new(ChangeCounter {
            wave: Wave::new(),
            fired: fired.clone(),
        });
        parity.add_observer(&counter);

        a.set(3); // parity still 1
        assert_eq!(fired.get(), 0);

        a.set(4); // parity 0
        assert_eq!(fired.get(), 1);

        a.set(6); // parity still 0
        assert_eq!(fired.get(), 1);

        parity.remove_observer(&counter);
    }

    #[test]
    fn keyed_cells_share_state() {
        let a = mutable(1);
        let key = Key::composite("double", vec![a.key()]);

        let a2 = a.clone();
        let c1 = Computed::with_key(key.clone(), move || Ok(a2.call()? * 2));
        let a3 = a.clone();
        let c2 = Computed::with_key(key.clone(), move || Ok(a3.call()? * 2));

        let (_r1, o1) = observe(&c1);
        let (_r2, o2) = observe(&c2);

        let s1 = c1.state().unwrap();
        let s2 = c2.state().unwrap();
        assert!(Rc::ptr_eq(&s1, &s2));

        c1.remove_observer(&o1);
        // Still active through the other handle's observer.
        assert!(!s2.core().is_disposed());

        c2.remove_observer(&o2);
        assert!(crate::state::shared_get::<ComputeState<i32>>(&key).is_none());
    }

    #[test]
    fn deactivation_unsubscribes_from_dependencies() {
        let a = mutable(1);
        let computes = Rc::new(StdCell::new(0u32));

        let (a2, n) = (a.clone(), computes.clone());
        let b = computed(move || {
            n.set(n.get() + 1);
            Ok(a2.call()? + 1)
        });

        let (_recorder, observer) = observe(&b);
        assert_eq!(computes.get(), 1);

        b.remove_observer(&observer);

        // Cell is inactive: the write must not trigger a recomputation.
        a.set(50);
        assert_eq!(computes.get(), 1);
    }
}
