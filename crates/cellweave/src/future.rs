#![forbid(unsafe_code)]

//! Awaitable cell values and the local spawner.
//!
//! # Design
//!
//! A [`CellFuture`] is the value type asynchronous cells hold: a shared,
//! clonable handle onto a local (`!Send`) future. Cloning the handle does
//! not re-run the computation; every clone resolves to the same
//! completion. Each constructed handle carries a fresh identity; two
//! handles compare equal only when they came from the same construction,
//! which is exactly the equality mutable cells need to detect "a new
//! future was assigned".
//!
//! Completion delivery needs a task spawner. The library does not pick a
//! runtime: install one with [`set_spawner`] (any single-threaded
//! executor works; `futures::executor::LocalPool` in tests). Without a
//! spawner, wait cells simply stay pending.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::error::CellResult;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A clonable handle to a pending or completed asynchronous value.
pub struct CellFuture<T: Clone + 'static> {
    id: u64,
    shared: Shared<LocalBoxFuture<'static, CellResult<T>>>,
}

impl<T: Clone + 'static> CellFuture<T> {
    /// Wrap a future resolving to a value.
    pub fn new(future: impl std::future::Future<Output = T> + 'static) -> Self {
        Self::try_new(async move { Ok(future.await) })
    }

    /// Wrap a future that can resolve to an error.
    pub fn try_new(future: impl std::future::Future<Output = CellResult<T>> + 'static) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            shared: future.boxed_local().shared(),
        }
    }

    /// An already-completed value.
    pub fn ready(value: T) -> Self {
        Self::try_new(std::future::ready(Ok(value)))
    }

    /// An already-failed value.
    pub fn failed(error: crate::error::CellError) -> Self {
        Self::try_new(std::future::ready(Err(error)))
    }

    /// Await the completion of this handle.
    pub async fn completed(&self) -> CellResult<T> {
        self.shared.clone().await
    }

    /// Join two handles into one resolving to a pair. Errors surface in
    /// argument order.
    pub fn zip2<U: Clone + 'static>(a: &CellFuture<T>, b: &CellFuture<U>) -> CellFuture<(T, U)> {
        let (a, b) = (a.clone(), b.clone());
        CellFuture::try_new(async move {
            let (ra, rb) = futures::future::join(a.completed(), b.completed()).await;
            Ok((ra?, rb?))
        })
    }

    /// Join three handles into one resolving to a triple.
    pub fn zip3<U: Clone + 'static, V: Clone + 'static>(
        a: &CellFuture<T>,
        b: &CellFuture<U>,
        c: &CellFuture<V>,
    ) -> CellFuture<(T, U, V)> {
        let (a, b, c) = (a.clone(), b.clone(), c.clone());
        CellFuture::try_new(async move {
            let (ra, rb, rc) =
                futures::future::join3(a.completed(), b.completed(), c.completed()).await;
            Ok((ra?, rb?, rc?))
        })
    }
}

impl<T: Clone + 'static> Clone for CellFuture<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + 'static> PartialEq for CellFuture<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Clone + 'static> std::fmt::Debug for CellFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellFuture").field("id", &self.id).finish()
    }
}

type SpawnFn = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

thread_local! {
    static SPAWNER: RefCell<Option<SpawnFn>> = const { RefCell::new(None) };
}

/// Install the task spawner wait cells use to await completions.
///
/// The spawner must execute futures on this thread; all cell access
/// happens without synchronization.
pub fn set_spawner(spawner: impl Fn(LocalBoxFuture<'static, ()>) + 'static) {
    SPAWNER.with(|s| *s.borrow_mut() = Some(Rc::new(spawner)));
}

/// Remove the installed spawner.
pub fn clear_spawner() {
    SPAWNER.with(|s| *s.borrow_mut() = None);
}

/// Hand a completion task to the installed spawner.
pub(crate) fn spawn(future: impl std::future::Future<Output = ()> + 'static) {
    let spawner = SPAWNER.with(|s| s.borrow().clone());
    match spawner {
        Some(spawner) => spawner(future.boxed_local()),
        None => {
            tracing::warn!("no local spawner installed; async completion dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
