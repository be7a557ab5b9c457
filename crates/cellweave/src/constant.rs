#![forbid(unsafe_code)]

//! Immutable value cells.

use std::rc::Rc;

use crate::cell::Cell;
use crate::error::CellResult;
use crate::key::Key;
use crate::observer::Observer;

/// A cell holding a value that never changes.
///
/// Constants accept observers but never notify them; observing a constant
/// is a no-op.
pub struct Constant<T: Clone + 'static> {
    inner: Rc<ConstantInner<T>>,
}

struct ConstantInner<T> {
    key: Key,
    value: T,
}

impl<T: Clone + 'static> Constant<T> {
    /// Create a constant cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(ConstantInner {
                key: Key::unique(),
                value,
            }),
        }
    }
}

impl<T: Clone + 'static> Clone for Constant<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Constant<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Constant").field(&self.inner.value).finish()
    }
}

impl<T: Clone + 'static> Cell for Constant<T> {
    type Value = T;

    fn key(&self) -> Key {
        self.inner.key.clone()
    }

    fn try_value(&self) -> CellResult<T> {
        Ok(self.inner.value.clone())
    }

    fn add_observer(&self, _observer: &Rc<dyn Observer>) {}

    fn remove_observer(&self, _observer: &Rc<dyn Observer>) {}
}

/// Create a constant cell holding `value`.
#[must_use]
pub fn value<T: Clone + 'static>(v: T) -> Constant<T> {
    Constant::new(v)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;

    #[test]
    fn holds_value() {
        let c = value(17);
        assert_eq!(c.try_value().ok(), Some(17));
        assert_eq!(c.value(), 17);
    }

    #[test]
    fn observers_are_ignored() {
        let c = value("fixed");
        let observer: Rc<dyn Observer> = Rc::new(NoopObserver);
        c.add_observer(&observer);
        c.remove_observer(&observer);
        assert_eq!(c.value(), "fixed");
    }

    #[test]
    fn clones_share_identity() {
        let a = value(1.5);
        let b = a.clone();
        assert_eq!(a.key(), b.key());
    }
}
