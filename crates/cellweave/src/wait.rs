#![forbid(unsafe_code)]

//! Wait cells: synchronous views onto awaitable-valued cells.
//!
//! # Design
//!
//! A wait cell observes a source cell holding a [`CellFuture`] and
//! materializes its completion into an ordinary cell value. Reading the
//! cell before the completion landed reports the pending marker.
//!
//! Assignment of a new future to the source advances a generation
//! counter and, depending on [`WaitOptions`]:
//!
//! - `reset = true` (default): the value resets to pending immediately
//!   (observers are notified), and results of superseded futures are
//!   discarded.
//! - `reset = false, queue = false`: the previous value is kept until
//!   the *newest* future completes; older completions are discarded.
//! - `reset = false, queue = true`: completions are applied in
//!   assignment order, even when the futures complete out of order.
//!   Each completion task waits for its predecessor's done-signal
//!   before applying its own result.
//!
//! Completion application emits its own propagation wave; the source
//! change wave is forwarded only in reset mode (where the value visibly
//! becomes pending).

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use futures::channel::oneshot;

use crate::cell::{Cell, DynCell};
use crate::computed::Computed;
use crate::error::{CellError, CellResult};
use crate::future::{self, CellFuture};
use crate::key::{Key, KeyAtom};
use crate::observer::{Observer, Wave};
use crate::state::{attach, detach, CellState, StateCore, StateSlot};

/// Behavior of a wait cell when its source is reassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Reset to pending on every source change.
    pub reset: bool,
    /// Apply completions in assignment order instead of keeping only the
    /// newest. Ignored when `reset` is set.
    pub queue: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            reset: true,
            queue: false,
        }
    }
}

impl WaitOptions {
    /// Keep the last completed value while a new future is in flight;
    /// only the newest future's completion is applied.
    #[must_use]
    pub fn keep_latest() -> Self {
        Self {
            reset: false,
            queue: false,
        }
    }

    /// Keep the last completed value and apply every completion in
    /// assignment order.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            reset: false,
            queue: true,
        }
    }

    fn effective_queue(self) -> bool {
        self.queue && !self.reset
    }
}

/// A cell holding the completed value of its source's future.
pub struct Wait<T: Clone + PartialEq + 'static> {
    inner: Rc<WaitInner<T>>,
}

struct WaitInner<T: Clone + PartialEq + 'static> {
    key: Key,
    source: DynCell,
    read: Rc<dyn Fn() -> CellResult<CellFuture<T>>>,
    options: WaitOptions,
    slot: StateSlot<WaitState<T>>,
}

struct WaitState<T: Clone + PartialEq + 'static> {
    core: StateCore,
    this: Weak<WaitState<T>>,
    source: DynCell,
    read: Rc<dyn Fn() -> CellResult<CellFuture<T>>>,
    options: WaitOptions,
    wave: Wave,
    generation: StdCell<u64>,
    result: RefCell<CellResult<T>>,
    /// Done-signal of the most recently launched task, for queue
    /// chaining.
    tail: RefCell<Option<oneshot::Receiver<()>>>,
}

impl<T: Clone + PartialEq + 'static> WaitState<T> {
    fn new(
        key: Key,
        source: DynCell,
        read: Rc<dyn Fn() -> CellResult<CellFuture<T>>>,
        options: WaitOptions,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            core: StateCore::new(key),
            this: this.clone(),
            source,
            read,
            options,
            wave: Wave::new(),
            generation: StdCell::new(0),
            result: RefCell::new(Err(CellError::pending())),
            tail: RefCell::new(None),
        })
    }

    /// Read the source's current future and spawn the task that applies
    /// its completion.
    fn launch(&self) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let pending_future = (self.read)();

        let predecessor = if self.options.effective_queue() {
            self.tail.borrow_mut().take()
        } else {
            None
        };
        let (done_tx, done_rx) = oneshot::channel();
        if self.options.effective_queue() {
            *self.tail.borrow_mut() = Some(done_rx);
        }

        let state = self.this.clone();
        future::spawn(async move {
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }
            let outcome = match pending_future {
                Ok(future) => future.completed().await,
                Err(e) => Err(e),
            };
            if let Some(state) = state.upgrade() {
                state.apply(generation, outcome);
            }
            let _ = done_tx.send(());
        });
    }

    /// Commit a completion, unless it belongs to a superseded future.
    fn apply(&self, generation: u64, outcome: CellResult<T>) {
        if self.core.is_disposed() {
            return;
        }
        if !self.options.effective_queue() && generation != self.generation.get() {
            return;
        }
        self.core.notify_will_update();
        *self.result.borrow_mut() = outcome;
        self.core.notify_did_update(true);
    }
}

impl<T: Clone + PartialEq + 'static> Observer for WaitState<T> {
    fn will_update(&self, _source: &Key) {
        let first = self.wave.arrive();
        // Only reset mode makes the source change itself observable.
        if first && self.options.reset {
            self.core.notify_will_update();
        }
    }

    fn did_update(&self, _source: &Key, changed: bool) {
        if let Some(any_changed) = self.wave.depart(changed) {
            if self.options.reset {
                if any_changed {
                    *self.result.borrow_mut() = Err(CellError::pending());
                }
                self.core.notify_did_update(any_changed);
            }
            if any_changed {
                self.launch();
            }
        }
    }
}

impl<T: Clone + PartialEq + 'static> CellState for WaitState<T> {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn init(self: Rc<Self>) {
        let observer: Rc<dyn Observer> = self.clone();
        self.source.add_observer(&observer);
        self.launch();
    }

    fn dispose(self: Rc<Self>) {
        let observer: Rc<dyn Observer> = self.clone();
        self.source.remove_observer(&observer);
        // Outstanding tasks find a dead weak reference or a stale
        // generation and discard their results.
        *self.tail.borrow_mut() = None;
    }
}

impl<T: Clone + PartialEq + 'static> Wait<T> {
    fn ensure_state(&self) -> Rc<WaitState<T>> {
        let inner = &self.inner;
        inner.slot.ensure(&inner.key, || {
            WaitState::new(
                inner.key.clone(),
                inner.source.clone(),
                inner.read.clone(),
                inner.options,
            )
        })
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Wait<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> std::fmt::Debug for Wait<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wait")
            .field("key", &self.inner.key)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Cell for Wait<T> {
    type Value = T;

    fn key(&self) -> Key {
        self.inner.key.clone()
    }

    fn try_value(&self) -> CellResult<T> {
        match self.inner.slot.get(&self.inner.key) {
            Some(state) => state.result.borrow().clone(),
            None => Err(CellError::uninitialized()),
        }
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

/// Create a wait cell over `cell` with default options (reset).
pub fn waited<T, C>(cell: &C) -> Wait<T>
where
    T: Clone + PartialEq + 'static,
    C: Cell<Value = CellFuture<T>>,
{
    waited_with(cell, WaitOptions::default())
}

/// Create a wait cell over `cell` with explicit options.
pub fn waited_with<T, C>(cell: &C, options: WaitOptions) -> Wait<T>
where
    T: Clone + PartialEq + 'static,
    C: Cell<Value = CellFuture<T>>,
{
    let source = cell.clone();
    Wait {
        inner: Rc::new(WaitInner {
            key: Key::composite_with(
                "waited",
                vec![cell.key()],
                vec![KeyAtom::Bool(options.reset), KeyAtom::Bool(options.queue)],
            ),
            source: cell.to_dyn(),
            read: Rc::new(move || source.try_value()),
            options,
            slot: StateSlot::new(),
        }),
    }
}

/// Wait cell joining two asynchronous cells into a pair.
///
/// The value recomputes once per propagation wave: a batch writing both
/// sources yields a single joined future, and one completion.
pub fn waited2<A, B, TA, TB>(a: &A, b: &B, options: WaitOptions) -> Wait<(TA, TB)>
where
    TA: Clone + PartialEq + 'static,
    TB: Clone + PartialEq + 'static,
    A: Cell<Value = CellFuture<TA>>,
    B: Cell<Value = CellFuture<TB>>,
{
    let (a2, b2) = (a.clone(), b.clone());
    let gathered = Computed::with_key(
        Key::composite("gather", vec![a.key(), b.key()]),
        move || Ok(CellFuture::zip2(&a2.call()?, &b2.call()?)),
    );
    waited_with(&gathered, options)
}

/// Wait cell joining three asynchronous cells into a triple.
pub fn waited3<A, B, C, TA, TB, TC>(
    a: &A,
    b: &B,
    c: &C,
    options: WaitOptions,
) -> Wait<(TA, TB, TC)>
where
    TA: Clone + PartialEq + 'static,
    TB: Clone + PartialEq + 'static,
    TC: Clone + PartialEq + 'static,
    A: Cell<Value = CellFuture<TA>>,
    B: Cell<Value = CellFuture<TB>>,
    C: Cell<Value = CellFuture<TC>>,
{
    let (a2, b2, c2) = (a.clone(), b.clone(), c.clone());
    let gathered = Computed::with_key(
        Key::composite("gather", vec![a.key(), b.key(), c.key()]),
        move || {
            Ok(CellFuture::zip3(
                &a2.call()?,
                &b2.call()?,
                &c2.call()?,
            ))
        },
    );
    waited_with(&gathered, options)
}

/// Wait-cell sugar on asynchronous cells.
pub trait AsyncCellExt<T>: Cell<Value = CellFuture<T>>
where
    T: Clone + PartialEq + 'static,
{
    /// Wait cell over this cell, resetting on every change.
    fn waited(&self) -> Wait<T> {
        waited(self)
    }

    /// Wait cell over this cell with explicit options.
    fn waited_with(&self, options: WaitOptions) -> Wait<T> {
        waited_with(self, options)
    }

    /// Build the wait cell and read it in one expression (tracked).
    fn wait(&self) -> CellResult<T> {
        AsyncCellExt::waited(self).call()
    }

    /// Like [`AsyncCellExt::wait`] with explicit options.
    fn wait_with(&self, options: WaitOptions) -> CellResult<T> {
        AsyncCellExt::waited_with(self, options).call()
    }
}

impl<T, C> AsyncCellExt<T> for C
where
    T: Clone + PartialEq + 'static,
    C: Cell<Value = CellFuture<T>>,
{
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
