#![forbid(unsafe_code)]

//! Stateless expression cells with a fixed argument set.
//!
//! # Design
//!
//! A [`Derived`] cell holds no cached value: every read evaluates the
//! expression against the current argument values. Observation is
//! delegated: adding an observer registers a forwarding wrapper on each
//! argument that replaces the notification source with the derived cell's
//! own key, so downstream wave accounting sees one source per expression,
//! not one per operand.
//!
//! Operator sugar builds these with structural keys, which makes two
//! independently constructed `a + b` cells observationally identical.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cell::{Cell, DynCell};
use crate::error::CellResult;
use crate::key::Key;
use crate::observer::Observer;

/// A stateless cell computing an expression over fixed argument cells.
pub struct Derived<T: Clone + 'static> {
    inner: Rc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    key: Key,
    args: Vec<DynCell>,
    compute: Rc<dyn Fn() -> CellResult<T>>,
    /// Forwarding wrappers installed on the arguments, keyed by the
    /// registered observer's identity.
    wrappers: RefCell<Vec<WrapperEntry>>,
}

struct WrapperEntry {
    addr: usize,
    wrapper: Rc<ForwardObserver>,
    count: usize,
}

/// Observer wrapper that re-labels notifications with the derived cell's
/// key before forwarding them.
struct ForwardObserver {
    source: Key,
    target: Weak<dyn Observer>,
}

impl Observer for ForwardObserver {
    fn will_update(&self, _source: &Key) {
        if let Some(target) = self.target.upgrade() {
            target.will_update(&self.source);
        }
    }

    fn did_update(&self, _source: &Key, changed: bool) {
        if let Some(target) = self.target.upgrade() {
            target.did_update(&self.source, changed);
        }
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Create an expression cell over `args`.
    ///
    /// `compute` should read the arguments with plain
    /// [`Cell::try_value`] reads; the argument set is fixed, so tracked
    /// reads inside the expression would be redundant.
    pub fn new(
        key: Key,
        args: Vec<DynCell>,
        compute: impl Fn() -> CellResult<T> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(DerivedInner {
                key,
                args,
                compute: Rc::new(compute),
                wrappers: RefCell::new(Vec::new()),
            }),
        }
    }
}

impl<T: Clone + 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("key", &self.inner.key)
            .field("args", &self.inner.args.len())
            .finish()
    }
}

impl<T: Clone + 'static> Cell for Derived<T> {
    type Value = T;

    fn key(&self) -> Key {
        self.inner.key.clone()
    }

    fn try_value(&self) -> CellResult<T> {
        (self.inner.compute)()
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        let addr = Rc::as_ptr(observer) as *const () as usize;
        let mut wrappers = self.inner.wrappers.borrow_mut();
        if let Some(entry) = wrappers.iter_mut().find(|e| e.addr == addr) {
            entry.count += 1;
            return;
        }
        let wrapper = Rc::new(ForwardObserver {
            source: self.inner.key.clone(),
            target: Rc::downgrade(observer),
        });
        wrappers.push(WrapperEntry {
            addr,
            wrapper: wrapper.clone(),
            count: 1,
        });
        drop(wrappers);
        let forward: Rc<dyn Observer> = wrapper;
        for arg in &self.inner.args {
            arg.add_observer(&forward);
        }
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        let addr = Rc::as_ptr(observer) as *const () as usize;
        let mut wrappers = self.inner.wrappers.borrow_mut();
        let Some(pos) = wrappers.iter().position(|e| e.addr == addr) else {
            return;
        };
        if wrappers[pos].count > 1 {
            wrappers[pos].count -= 1;
            return;
        }
        let entry = wrappers.remove(pos);
        drop(wrappers);
        let forward: Rc<dyn Observer> = entry.wrapper;
        for arg in &self.inner.args {
            arg.remove_observer(&forward);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
