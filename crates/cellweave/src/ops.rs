#![forbid(unsafe_code)]

//! Operator sugar over cells.
//!
//! Every method builds an expression cell with a *structural* key formed
//! from the operator tag and the operand keys, so two syntactically
//! identical expressions over the same cells are observationally
//! identical. Arithmetic, bitwise and comparison operators produce
//! stateless [`Derived`] cells; `select` produces a [`Computed`] cell
//! because only the taken branch should be subscribed.
//!
//! Rust's coherence rules rule out blanket `std::ops` impls over a
//! foreign type parameter, hence an extension trait instead of `a + b`.

use crate::cell::Cell;
use crate::computed::Computed;
use crate::derived::Derived;
use crate::error::none;
use crate::key::Key;
use crate::peek::Peek;

/// Absolute value, for cell operands.
pub trait Abs {
    fn abs(self) -> Self;
}

macro_rules! impl_abs {
    ($($t:ty),*) => {
        $(impl Abs for $t {
            fn abs(self) -> Self {
                <$t>::abs(self)
            }
        })*
    };
}

impl_abs!(i8, i16, i32, i64, i128, isize, f32, f64);

/// Rounding operations, for float cell operands.
pub trait Rounding {
    fn round(self) -> Self;
    fn floor(self) -> Self;
    fn ceil(self) -> Self;
    fn trunc(self) -> Self;
}

macro_rules! impl_rounding {
    ($($t:ty),*) => {
        $(impl Rounding for $t {
            fn round(self) -> Self {
                <$t>::round(self)
            }
            fn floor(self) -> Self {
                <$t>::floor(self)
            }
            fn ceil(self) -> Self {
                <$t>::ceil(self)
            }
            fn trunc(self) -> Self {
                <$t>::trunc(self)
            }
        })*
    };
}

impl_rounding!(f32, f64);

macro_rules! binary_op {
    ($(#[$doc:meta])* $name:ident, $tag:literal, $op_trait:ident, $op_method:ident) => {
        $(#[$doc])*
        fn $name<C>(&self, other: &C) -> Derived<<Self::Value as std::ops::$op_trait<C::Value>>::Output>
        where
            C: Cell,
            Self::Value: std::ops::$op_trait<C::Value>,
            <Self::Value as std::ops::$op_trait<C::Value>>::Output: Clone + 'static,
        {
            let (a, b) = (self.clone(), other.clone());
            Derived::new(
                Key::composite($tag, vec![self.key(), other.key()]),
                vec![self.to_dyn(), other.to_dyn()],
                move || Ok(std::ops::$op_trait::$op_method(a.try_value()?, b.try_value()?)),
            )
        }
    };
}

macro_rules! cmp_op {
    ($(#[$doc:meta])* $name:ident, $tag:literal, $method:ident) => {
        $(#[$doc])*
        fn $name<C>(&self, other: &C) -> Derived<bool>
        where
            C: Cell,
            Self::Value: PartialOrd<C::Value>,
        {
            let (a, b) = (self.clone(), other.clone());
            Derived::new(
                Key::composite($tag, vec![self.key(), other.key()]),
                vec![self.to_dyn(), other.to_dyn()],
                move || Ok(a.try_value()?.$method(&b.try_value()?)),
            )
        }
    };
}

macro_rules! unary_map_op {
    ($(#[$doc:meta])* $name:ident, $tag:literal, $bound:ident) => {
        $(#[$doc])*
        fn $name(&self) -> Derived<Self::Value>
        where
            Self::Value: $bound,
        {
            let a = self.clone();
            Derived::new(
                Key::composite($tag, vec![self.key()]),
                vec![self.to_dyn()],
                move || Ok($bound::$name(a.try_value()?)),
            )
        }
    };
}

/// Expression-building operations available on every cell.
pub trait CellExt: Cell {
    binary_op!(
        /// Cell computing `self + other`.
        add, "add", Add, add
    );
    binary_op!(
        /// Cell computing `self - other`.
        sub, "sub", Sub, sub
    );
    binary_op!(
        /// Cell computing `self * other`.
        mul, "mul", Mul, mul
    );
    binary_op!(
        /// Cell computing `self / other`.
        div, "div", Div, div
    );
    binary_op!(
        /// Cell computing `self % other`.
        rem, "rem", Rem, rem
    );
    binary_op!(
        /// Cell computing `self & other`.
        bitand, "bitand", BitAnd, bitand
    );
    binary_op!(
        /// Cell computing `self | other`.
        bitor, "bitor", BitOr, bitor
    );
    binary_op!(
        /// Cell computing `self ^ other`.
        bitxor, "bitxor", BitXor, bitxor
    );
    binary_op!(
        /// Cell computing `self << other`.
        shl, "shl", Shl, shl
    );
    binary_op!(
        /// Cell computing `self >> other`.
        shr, "shr", Shr, shr
    );

    cmp_op!(
        /// Cell computing `self < other`.
        lt, "lt", lt
    );
    cmp_op!(
        /// Cell computing `self <= other`.
        le, "le", le
    );
    cmp_op!(
        /// Cell computing `self > other`.
        gt, "gt", gt
    );
    cmp_op!(
        /// Cell computing `self >= other`.
        ge, "ge", ge
    );

    /// Cell computing `self == other`.
    fn eq<C>(&self, other: &C) -> Derived<bool>
    where
        C: Cell,
        Self::Value: PartialEq<C::Value>,
    {
        let (a, b) = (self.clone(), other.clone());
        Derived::new(
            Key::composite("eq", vec![self.key(), other.key()]),
            vec![self.to_dyn(), other.to_dyn()],
            move || Ok(a.try_value()?.eq(&b.try_value()?)),
        )
    }

    /// Cell computing `self != other`.
    fn ne<C>(&self, other: &C) -> Derived<bool>
    where
        C: Cell,
        Self::Value: PartialEq<C::Value>,
    {
        let (a, b) = (self.clone(), other.clone());
        Derived::new(
            Key::composite("ne", vec![self.key(), other.key()]),
            vec![self.to_dyn(), other.to_dyn()],
            move || Ok(a.try_value()?.ne(&b.try_value()?)),
        )
    }

    /// Cell computing `-self`.
    fn neg(&self) -> Derived<<Self::Value as std::ops::Neg>::Output>
    where
        Self::Value: std::ops::Neg,
        <Self::Value as std::ops::Neg>::Output: Clone + 'static,
    {
        let a = self.clone();
        Derived::new(
            Key::composite("neg", vec![self.key()]),
            vec![self.to_dyn()],
            move || Ok(std::ops::Neg::neg(a.try_value()?)),
        )
    }

    /// Cell computing `!self` (bitwise, or logical for `bool`).
    fn not(&self) -> Derived<<Self::Value as std::ops::Not>::Output>
    where
        Self::Value: std::ops::Not,
        <Self::Value as std::ops::Not>::Output: Clone + 'static,
    {
        let a = self.clone();
        Derived::new(
            Key::composite("not", vec![self.key()]),
            vec![self.to_dyn()],
            move || Ok(std::ops::Not::not(a.try_value()?)),
        )
    }

    unary_map_op!(
        /// Cell computing the absolute value of `self`.
        abs, "abs", Abs
    );
    unary_map_op!(
        /// Cell rounding `self` to the nearest integer.
        round, "round", Rounding
    );
    unary_map_op!(
        /// Cell computing the floor of `self`.
        floor, "floor", Rounding
    );
    unary_map_op!(
        /// Cell computing the ceiling of `self`.
        ceil, "ceil", Rounding
    );
    unary_map_op!(
        /// Cell truncating `self` toward zero.
        trunc, "trunc", Rounding
    );

    /// Cell computing the logical **and** of two boolean cells.
    ///
    /// The right operand is only read when the left is true.
    fn logand<C>(&self, other: &C) -> Derived<bool>
    where
        Self: Cell<Value = bool>,
        C: Cell<Value = bool>,
    {
        let (a, b) = (self.clone(), other.clone());
        Derived::new(
            Key::composite("logand", vec![self.key(), other.key()]),
            vec![self.to_dyn(), other.to_dyn()],
            move || Ok(a.try_value()? && b.try_value()?),
        )
    }

    /// Cell computing the logical **or** of two boolean cells.
    ///
    /// The right operand is only read when the left is false.
    fn logor<C>(&self, other: &C) -> Derived<bool>
    where
        Self: Cell<Value = bool>,
        C: Cell<Value = bool>,
    {
        let (a, b) = (self.clone(), other.clone());
        Derived::new(
            Key::composite("logor", vec![self.key(), other.key()]),
            vec![self.to_dyn(), other.to_dyn()],
            move || Ok(a.try_value()? || b.try_value()?),
        )
    }

    /// Cell computing the logical negation of a boolean cell.
    fn lognot(&self) -> Derived<bool>
    where
        Self: Cell<Value = bool>,
    {
        let a = self.clone();
        Derived::new(
            Key::composite("lognot", vec![self.key()]),
            vec![self.to_dyn()],
            move || Ok(!a.try_value()?),
        )
    }

    /// Cell selecting between two branches on this boolean condition.
    ///
    /// Only the taken branch is a live dependency: writes to the other
    /// branch do not recompute the selection.
    fn select<C1, C2>(&self, if_true: &C1, if_false: &C2) -> Computed<C1::Value>
    where
        Self: Cell<Value = bool>,
        C1: Cell,
        C2: Cell<Value = C1::Value>,
        C1::Value: PartialEq,
    {
        let cond = self.clone();
        let (t, f) = (if_true.clone(), if_false.clone());
        Computed::with_key(
            Key::composite("select", vec![self.key(), if_true.key(), if_false.key()]),
            move || {
                if cond.call()? {
                    t.call()
                } else {
                    f.call()
                }
            },
        )
    }

    /// Cell evaluating to `if_true` while this condition holds, keeping
    /// its previous value otherwise.
    fn select_or_hold<C1>(&self, if_true: &C1) -> Computed<C1::Value>
    where
        Self: Cell<Value = bool>,
        C1: Cell,
        C1::Value: PartialEq,
    {
        let cond = self.clone();
        let t = if_true.clone();
        Computed::with_key(
            Key::composite("select-hold", vec![self.key(), if_true.key()]),
            move || {
                if cond.call()? {
                    t.call()
                } else {
                    Err(none())
                }
            },
        )
    }

    /// Read this cell through a peek: keeps it active without reacting
    /// to its changes.
    fn peek(&self) -> Peek<Self> {
        Peek::new(self.clone())
    }
}

impl<C: Cell> CellExt for C {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
