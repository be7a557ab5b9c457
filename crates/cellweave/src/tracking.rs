#![forbid(unsafe_code)]

//! Dependency tracking frames.
//!
//! While a compute function runs, a tracker frame sits on a thread-local
//! stack. Every tracked read ([`crate::cell::Cell::call`]) reports the
//! referenced cell to the innermost frame; plain reads outside any frame
//! report nothing. Frames shield each other: a nested compute pushes its
//! own frame, so its reads never leak into the enclosing one.
//!
//! The same stack carries value-snapshot overlays for scheduled watches:
//! while an overlay is installed, tracked reads of the snapshotted cells
//! resolve to the values captured at scheduling time instead of the live
//! values.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::cell::DynCell;
use crate::error::{CellError, CellResult};
use crate::key::Key;

pub(crate) type TrackFn = Rc<dyn Fn(&DynCell)>;
pub(crate) type SnapshotMap = AHashMap<Key, CellResult<Rc<dyn Any>>>;

thread_local! {
    static FRAMES: RefCell<Vec<Option<TrackFn>>> = const { RefCell::new(Vec::new()) };
    static SNAPSHOTS: RefCell<Vec<SnapshotMap>> = const { RefCell::new(Vec::new()) };
}

/// Report a tracked read to the innermost frame, if any.
pub(crate) fn track(cell: &DynCell) {
    let tracker = FRAMES.with(|frames| frames.borrow().last().cloned().flatten());
    if let Some(tracker) = tracker {
        tracker(cell);
    }
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Run `body` with `tracker` receiving every tracked read inside it.
pub(crate) fn with_tracker<R>(tracker: TrackFn, body: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(Some(tracker)));
    let _guard = FrameGuard;
    body()
}

/// Run `body` with dependency tracking suppressed.
///
/// Tracked reads inside `body` behave like plain value reads; the
/// enclosing frame (if any) sees nothing.
pub fn untracked<R>(body: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(None));
    let _guard = FrameGuard;
    body()
}

struct SnapshotGuard;

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        SNAPSHOTS.with(|snaps| {
            snaps.borrow_mut().pop();
        });
    }
}

/// Run `body` with a value-snapshot overlay installed.
pub(crate) fn with_snapshot<R>(snapshot: SnapshotMap, body: impl FnOnce() -> R) -> R {
    SNAPSHOTS.with(|snaps| snaps.borrow_mut().push(snapshot));
    let _guard = SnapshotGuard;
    body()
}

/// Look up `key` in the innermost snapshot overlay.
///
/// Returns `None` when no overlay is installed, the key is absent, or the
/// captured value has an unexpected type (the read then falls through to
/// the live cell).
pub(crate) fn snapshot_value<T: Clone + 'static>(key: &Key) -> Option<CellResult<T>> {
    SNAPSHOTS.with(|snaps| {
        let snaps = snaps.borrow();
        let entry = snaps.last()?.get(key)?;
        match entry {
            Ok(value) => {
                let value = value.clone().downcast::<T>().ok()?;
                Some(Ok((*value).clone()))
            }
            Err(e) => Some(Err(e.clone())),
        }
    })
}

#[cfg(test)]
pub(crate) fn frame_depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
