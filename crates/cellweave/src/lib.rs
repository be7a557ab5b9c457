#![forbid(unsafe_code)]

//! Glitch-free reactive cells.
//!
//! This crate models computations as a graph of *cells*: named value
//! holders whose changes propagate to dependents and observers in a
//! deterministic, glitch-free order.
//!
//! - [`mutable`]: writable leaf cells.
//! - [`value`]: constant cells.
//! - [`computed`]: derived cells that discover their dependencies by
//!   running their compute function.
//! - [`batch`]: coalesce several writes into one propagation wave.
//! - [`watch`] / [`watch_scheduled`]: side-effect callbacks.
//! - [`CellExt`]: operator sugar (`a.add(&b)`, `cond.select(..)`, ...)
//!   building expression cells with structural identity.
//! - [`RecoverExt`]: `on_error` / `error` recovery cells.
//! - [`waited`] / [`AsyncCellExt`]: wait cells over awaitable values.
//!
//! # Example
//!
//! ```
//! use cellweave::{computed, mutable, Cell};
//!
//! let a = mutable(1);
//! let b = mutable(2);
//!
//! let (a2, b2) = (a.clone(), b.clone());
//! let sum = computed(move || Ok(a2.call()? + b2.call()?));
//!
//! assert_eq!(sum.value(), 3);
//! a.set(5);
//! assert_eq!(sum.value(), 7);
//! ```
//!
//! # Architecture
//!
//! Cells are cheap `Clone` handles over `Rc` interiors. Observers are
//! held weakly, notified in registration order, and pruned lazily.
//! Propagation is a two-phase wave: `will_update` marks the downstream
//! graph stale, `did_update` commits; per-observer accounting fires each
//! observer exactly once per wave, after every dependency path has
//! committed. Stateful cells activate on their first observer and
//! deactivate on the last removal; composite-keyed cells share state, so
//! structurally equal expressions are one cell at runtime.
//!
//! # Invariants
//!
//! 1. An active computed cell's cached value equals what its compute
//!    function would return from current dependency values (outside a
//!    propagation wave).
//! 2. A cell is active exactly while its transitive observer count is
//!    positive.
//! 3. Per wave, each observer receives at most one completed
//!    notification, regardless of how many paths reach it.
//! 4. Within a batch, each written cell commits exactly once.
//!
//! # Threading
//!
//! Single-threaded by design: `Rc`, `RefCell` and thread-locals, no
//! internal locking. Green threads on one OS thread are fine as long as
//! compute functions do not block.

mod batch;
mod cell;
mod compute;
mod computed;
mod constant;
mod derived;
mod error;
mod future;
mod key;
mod mutable;
mod observer;
mod ops;
mod peek;
mod recover;
mod state;
mod tracking;
mod wait;
mod watch;

pub use batch::{batch, Batch};
pub use cell::{Cell, DynCell};
pub use computed::{computed, Computed};
pub use constant::{value, Constant};
pub use derived::Derived;
pub use error::{
    none, none_with, CapturedError, CellError, CellResult, DynError, PendingError,
    UninitializedError,
};
pub use future::{clear_spawner, set_spawner, CellFuture};
pub use key::{Key, KeyAtom};
pub use mutable::{mutable, Mutable};
pub use observer::Observer;
pub use ops::{Abs, CellExt, Rounding};
pub use peek::Peek;
pub use recover::RecoverExt;
pub use tracking::untracked;
pub use wait::{waited, waited2, waited3, waited_with, AsyncCellExt, Wait, WaitOptions};
pub use watch::{set_watch_error_sink, watch, watch_scheduled, Watcher};
