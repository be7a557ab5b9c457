#![forbid(unsafe_code)]

//! Batched propagation.
//!
//! # Design
//!
//! Within a batch scope, a mutable cell write still announces
//! `will_update` immediately, so staleness propagates through the graph
//! as usual, but the committed `did_update` is deferred. The cell enrolls
//! itself in the batch's flush list; when the outermost scope exits, the
//! list is walked once in enrollment order, closing every open wave with
//! exactly one `did_update` per written cell.
//!
//! Nested batches are no-ops: only the outermost scope flushes.
//!
//! # Invariants
//!
//! 1. A cell appears at most once in the flush list per batch, no matter
//!    how many times it was written.
//! 2. The flush runs with the batch context already removed, so writes
//!    performed by notified observers propagate immediately.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashSet;

/// A cell state that deferred its `did_update` to the end of the batch.
pub(crate) trait FlushCell {
    fn flush(&self);
}

struct BatchContext {
    queue: Vec<Rc<dyn FlushCell>>,
    enrolled: AHashSet<usize>,
}

thread_local! {
    static BATCH: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Is a batch currently in effect on this thread?
pub(crate) fn in_batch() -> bool {
    BATCH.with(|batch| batch.borrow().is_some())
}

/// Add a cell state to the current batch's flush list, once.
pub(crate) fn enroll(state: Rc<dyn FlushCell>) {
    BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        let Some(context) = batch.as_mut() else {
            debug_assert!(false, "enroll outside a batch");
            return;
        };
        let addr = Rc::as_ptr(&state) as *const () as usize;
        if context.enrolled.insert(addr) {
            context.queue.push(state);
        }
    });
}

/// RAII guard for a batch scope.
///
/// Dropping the guard of the outermost scope flushes the deferred
/// notifications; inner guards are inert.
pub struct Batch {
    outermost: bool,
}

impl Batch {
    /// Enter a batch scope.
    #[must_use]
    pub fn begin() -> Self {
        let outermost = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.is_some() {
                false
            } else {
                *batch = Some(BatchContext {
                    queue: Vec::new(),
                    enrolled: AHashSet::new(),
                });
                true
            }
        });
        Batch { outermost }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        // Remove the context first: notified observers must see no batch.
        let context = BATCH.with(|batch| batch.borrow_mut().take());
        if let Some(context) = context {
            tracing::trace!(cells = context.queue.len(), "batch flush");
            for state in context.queue {
                state.flush();
            }
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("outermost", &self.outermost)
            .finish()
    }
}

/// Run `body` inside a batch scope.
///
/// Observers of cells written inside `body` receive their committed
/// notifications when the outermost scope exits.
pub fn batch<R>(body: impl FnOnce() -> R) -> R {
    let _guard = Batch::begin();
    body()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
