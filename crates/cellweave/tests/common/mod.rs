#![allow(dead_code)]

//! Helpers shared by the integration suites.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

use cellweave::{set_spawner, CellError, CellFuture};

/// A log plus a closure appending to it.
pub fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(T)) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |v: T| sink.borrow_mut().push(v))
}

/// Install a `LocalPool` as the wait-cell spawner and return it.
pub fn install_pool() -> LocalPool {
    let pool = LocalPool::new();
    let spawner = pool.spawner();
    set_spawner(move |fut| {
        spawner.spawn_local(fut).ok();
    });
    pool
}

/// A future completed on demand from the test body.
pub fn controllable<T: Clone + 'static>() -> (oneshot::Sender<T>, CellFuture<T>) {
    let (tx, rx) = oneshot::channel::<T>();
    let fut = CellFuture::try_new(async move { rx.await.map_err(|_| CellError::pending()) });
    (tx, fut)
}
