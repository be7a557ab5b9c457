#![forbid(unsafe_code)]

//! Watch callbacks: side effects driven by cell changes.
//!
//! # Design
//!
//! A watch runs its callback once at creation to discover the cells it
//! reads, subscribes to them, and re-runs the callback whenever a
//! propagation wave that changed at least one of them completes. Each run
//! re-discovers the dependency set, so conditional reads evolve the
//! subscriptions just like a computed cell's.
//!
//! With a `schedule` hook installed, the callback is not run inline.
//! Instead the current dependency values are snapshotted into a deferred
//! closure and handed to the hook; when the closure eventually runs, the
//! callback's reads resolve against that snapshot. Under a cooperative
//! scheduler this guarantees the callback observes the values as of the
//! moment the change fired, even if further writes landed before the
//! scheduled slot.
//!
//! # Failure Modes
//!
//! - **Callback error**: routed to the watch error sink (default:
//!   `tracing::error!`); propagation to other observers is unaffected.
//! - **Synchronous re-entry**: a callback that writes one of its own
//!   dependencies would fire itself mid-dispatch; the inner firing is
//!   dropped.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};

use crate::cell::DynCell;
use crate::error::{CellError, CellResult};
use crate::key::Key;
use crate::observer::{Observer, Wave};
use crate::tracking::{self, SnapshotMap, TrackFn};

type WatchFn = Box<dyn FnMut() -> CellResult<()>>;
type ScheduleFn = Rc<dyn Fn(Box<dyn FnOnce()>)>;

thread_local! {
    static SINK: RefCell<Rc<dyn Fn(&CellError)>> = RefCell::new(Rc::new(|error: &CellError| {
        tracing::error!(%error, "watch callback failed");
    }));

    static KEEPERS: RefCell<Vec<Rc<WatchObserver>>> = const { RefCell::new(Vec::new()) };
}

/// Install the sink receiving errors returned by watch callbacks.
pub fn set_watch_error_sink(sink: impl Fn(&CellError) + 'static) {
    SINK.with(|s| *s.borrow_mut() = Rc::new(sink));
}

fn report(error: &CellError) {
    let sink = SINK.with(|s| s.borrow().clone());
    sink(error);
}

struct WatchObserver {
    this: Weak<WatchObserver>,
    callback: RefCell<WatchFn>,
    deps: RefCell<AHashMap<Key, DynCell>>,
    wave: Wave,
    schedule: Option<ScheduleFn>,
    dispatching: StdCell<bool>,
    stopped: StdCell<bool>,
}

struct DispatchGuard(Rc<WatchObserver>);

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.0.dispatching.set(false);
    }
}

impl WatchObserver {
    fn as_observer(&self) -> Option<Rc<dyn Observer>> {
        self.this.upgrade().map(|rc| rc as Rc<dyn Observer>)
    }

    /// Run the callback under a fresh tracking frame, optionally against
    /// a value snapshot, then reconcile the subscriptions.
    fn run(self: Rc<Self>, snapshot: Option<SnapshotMap>) {
        if self.stopped.get() || self.dispatching.get() {
            return;
        }
        self.dispatching.set(true);
        let _guard = DispatchGuard(self.clone());

        let run_set: Rc<RefCell<AHashSet<Key>>> = Rc::new(RefCell::new(AHashSet::new()));
        let tracker: TrackFn = {
            let run_set = run_set.clone();
            let this = self.this.clone();
            Rc::new(move |cell: &DynCell| {
                let key = cell.key();
                if !run_set.borrow_mut().insert(key.clone()) {
                    return;
                }
                let Some(watcher) = this.upgrade() else { return };
                let known = watcher.deps.borrow().contains_key(&key);
                if !known {
                    watcher.deps.borrow_mut().insert(key, cell.clone());
                    if let Some(observer) = watcher.as_observer() {
                        cell.add_observer(&observer);
                    }
                }
            })
        };

        let invoke = || {
            let result = tracking::with_tracker(tracker, || {
                let mut callback = self.callback.borrow_mut();
                (&mut **callback)()
            });
            if let Err(e) = result {
                report(&e);
            }
        };
        match snapshot {
            Some(map) => tracking::with_snapshot(map, invoke),
            None => invoke(),
        }

        if self.stopped.get() {
            // Stopped from inside the callback.
            self.unsubscribe_all();
            return;
        }

        // Drop subscriptions this run no longer exercised.
        let run_set = run_set.borrow();
        let dropped: Vec<DynCell> = {
            let mut deps = self.deps.borrow_mut();
            let gone: Vec<Key> = deps
                .keys()
                .filter(|k| !run_set.contains(*k))
                .cloned()
                .collect();
            gone.iter().filter_map(|k| deps.remove(k)).collect()
        };
        if let Some(observer) = self.as_observer() {
            for dep in dropped {
                dep.remove_observer(&observer);
            }
        }
    }

    fn fire(self: Rc<Self>) {
        if self.stopped.get() || self.dispatching.get() {
            return;
        }
        if let Some(schedule) = self.schedule.clone() {
            let snapshot = self.snapshot_deps();
            schedule(Box::new(move || self.run(Some(snapshot))));
        } else {
            self.run(None);
        }
    }

    fn snapshot_deps(&self) -> SnapshotMap {
        self.deps
            .borrow()
            .iter()
            .map(|(key, dep)| (key.clone(), dep.snapshot()))
            .collect()
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        self.unsubscribe_all();
    }

    fn unsubscribe_all(&self) {
        let Some(observer) = self.as_observer() else {
            return;
        };
        let deps: Vec<DynCell> = self.deps.borrow_mut().drain().map(|(_, d)| d).collect();
        for dep in deps {
            dep.remove_observer(&observer);
        }
    }
}

impl Observer for WatchObserver {
    fn will_update(&self, _source: &Key) {
        self.wave.arrive();
    }

    fn did_update(&self, _source: &Key, changed: bool) {
        if let Some(true) = self.wave.depart(changed) {
            if let Some(me) = self.this.upgrade() {
                me.fire();
            }
        }
    }
}

/// Handle of a running watch.
///
/// Dropping the handle stops the watch; call [`Watcher::forever`] to keep
/// it running for the lifetime of the thread.
pub struct Watcher {
    observer: Rc<WatchObserver>,
    stop_on_drop: StdCell<bool>,
}

impl Watcher {
    fn create(callback: WatchFn, schedule: Option<ScheduleFn>) -> Self {
        let observer = Rc::new_cyclic(|this| WatchObserver {
            this: this.clone(),
            callback: RefCell::new(callback),
            deps: RefCell::new(AHashMap::new()),
            wave: Wave::new(),
            schedule,
            dispatching: StdCell::new(false),
            stopped: StdCell::new(false),
        });
        // Discovery run: establishes the initial subscription set.
        observer.clone().run(None);
        Watcher {
            observer,
            stop_on_drop: StdCell::new(true),
        }
    }

    /// Uninstall every subscription. The callback will not run again.
    pub fn stop(&self) {
        self.observer.stop();
    }

    /// Has this watch been stopped?
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.observer.stopped.get()
    }

    /// Keep the watch running after the handle is dropped.
    pub fn forever(self) {
        self.stop_on_drop.set(false);
        KEEPERS.with(|keepers| keepers.borrow_mut().push(self.observer.clone()));
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if self.stop_on_drop.get() {
            self.observer.stop();
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Register `callback` as a watch function.
///
/// The callback runs once immediately to discover its dependencies, then
/// again whenever any of them changes. Errors it returns are routed to
/// the watch error sink.
pub fn watch(callback: impl FnMut() -> CellResult<()> + 'static) -> Watcher {
    Watcher::create(Box::new(callback), None)
}

/// Register a watch whose re-runs are handed to `schedule` as deferred
/// closures.
///
/// The deferred closure observes the dependency values as of the moment
/// it was scheduled, not the values at invocation time.
pub fn watch_scheduled(
    callback: impl FnMut() -> CellResult<()> + 'static,
    schedule: impl Fn(Box<dyn FnOnce()>) + 'static,
) -> Watcher {
    Watcher::create(Box::new(callback), Some(Rc::new(schedule)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::batch;
    use crate::cell::Cell;
    use crate::mutable::mutable;

    fn recording<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(T)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        (log, move |v: T| log2.borrow_mut().push(v))
    }

    #[test]
    fn runs_once_at_creation() {
        let a = mutable(1);
        let b = mutable(2);
        let (log, record) = recording();

        let (a2, b2) = (a.clone(), b.clone());
        let _w = watch(move || {
            record((a2.call()?, b2.call()?));
            Ok(())
        });

        assert_eq!(*log.borrow(), vec![(1, 2)]);
    }

    #[test]
    fn fires_on_each_change() {
        let a = mutable(0);
        let b = mutable(1);
        let (log, record) = recording();

        let (a2, b2) = (a.clone(), b.clone());
        let _w = watch(move || {
            record((a2.call()?, b2.call()?));
            Ok(())
        });

        a.set(5);
        b.set(10);

        assert_eq!(*log.borrow(), vec![(0, 1), (5, 1), (5, 10)]);
    }

    #[test]
    fn fires_once_per_batch() {
        let a = mutable(0);
        let b = mutable(1);
        let (log, record) = recording();

        let (a2, b2) = (a.clone(), b.clone());
        let _w = watch(move || {
            record((a2.call()?, b2.call()?));
            Ok(())
        });

        batch(|| {
            a.set(15);
            b.set(3);
        });

        assert_eq!(*log.borrow(), vec![(0, 1), (15, 3)]);
    }

    #[test]
    fn conditional_dependencies_evolve() {
        let selector = mutable(true);
        let a = mutable(1);
        let b = mutable(10);
        let (log, record) = recording();

        let (s2, a2, b2) = (selector.clone(), a.clone(), b.clone());
        let _w = watch(move || {
            if s2.call()? {
                record(a2.call()?);
            } else {
                record(b2.call()?);
            }
            Ok(())
        });

        a.set(2);
        selector.set(false);
        b.set(5);

        // While on the `b` branch, writes to `a` are invisible.
        a.set(77);

        assert_eq!(*log.borrow(), vec![1, 2, 10, 5]);
    }

    #[test]
    fn stop_uninstalls_subscriptions() {
        let a = mutable(1);
        let (log, record) = recording();

        let a2 = a.clone();
        let w = watch(move || {
            record(a2.call()?);
            Ok(())
        });

        a.set(5);
        w.stop();
        assert!(w.is_stopped());

        a.set(30);
        assert_eq!(*log.borrow(), vec![1, 5]);
    }

    #[test]
    fn drop_stops_the_watch() {
        let a = mutable(1);
        let (log, record) = recording();

        let a2 = a.clone();
        let w = watch(move || {
            record(a2.call()?);
            Ok(())
        });
        drop(w);

        a.set(9);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn forever_outlives_the_handle() {
        let a = mutable(1);
        let (log, record) = recording();

        let a2 = a.clone();
        watch(move || {
            record(a2.call()?);
            Ok(())
        })
        .forever();

        a.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn errors_reach_the_sink() {
        let reported = Rc::new(StdCell::new(0u32));
        let reported2 = reported.clone();
        set_watch_error_sink(move |_| reported2.set(reported2.get() + 1));

        let a = mutable(0);
        let a2 = a.clone();
        let _w = watch(move || {
            let v = a2.call()?;
            if v > 0 {
                return Err(CellError::pending());
            }
            Ok(())
        });

        assert_eq!(reported.get(), 0);
        a.set(1);
        assert_eq!(reported.get(), 1);

        // The watch keeps running after an error.
        a.set(0);
        a.set(2);
        assert_eq!(reported.get(), 2);
    }

    #[test]
    fn reentrant_firing_is_dropped() {
        let a = mutable(0);
        let runs = Rc::new(StdCell::new(0u32));

        let (a2, runs2) = (a.clone(), runs.clone());
        let _w = watch(move || {
            runs2.set(runs2.get() + 1);
            let v = a2.call()?;
            if v == 1 {
                // Writing one's own dependency mid-dispatch must not
                // recurse into the callback.
                a2.set(2);
            }
            Ok(())
        });

        assert_eq!(runs.get(), 1);
        a.set(1);

        // One run for the external write; the inner write's firing was
        // dropped while dispatching.
        assert_eq!(runs.get(), 2);
        assert_eq!(a.value(), 2);
    }

    #[test]
    fn scheduled_watch_defers_to_hook() {
        let a = mutable(1);
        let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let (log, record) = recording();

        let queue2 = queue.clone();
        let a2 = a.clone();
        let _w = watch_scheduled(
            move || {
                record(a2.call()?);
                Ok(())
            },
            move |deferred| queue2.borrow_mut().push(deferred),
        );

        // Initial discovery run is immediate.
        assert_eq!(*log.borrow(), vec![1]);

        a.set(2);
        assert_eq!(*log.borrow(), vec![1]); // deferred, not yet run

        let pending: Vec<_> = queue.borrow_mut().drain(..).collect();
        for deferred in pending {
            deferred();
        }
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn scheduled_run_sees_values_as_of_scheduling() {
        let a = mutable(1);
        let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let (log, record) = recording();

        let queue2 = queue.clone();
        let a2 = a.clone();
        let _w = watch_scheduled(
            move || {
                record(a2.call()?);
                Ok(())
            },
            move |deferred| queue2.borrow_mut().push(deferred),
        );

        a.set(2); // snapshot {a: 2}
        a.set(3); // snapshot {a: 3}

        let pending: Vec<_> = queue.borrow_mut().drain(..).collect();
        for deferred in pending {
            deferred();
        }

        // Each deferred run observed its own snapshot, not the live value.
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }
}
