#![forbid(unsafe_code)]

//! Cell identity.
//!
//! Every cell exposes a [`Key`]. Keys come in two flavors:
//!
//! - [`Key::Unique`]: a fresh identity minted at construction. Two cells
//!   built independently never compare equal.
//! - [`Key::Composite`]: a structural identity formed from an operator tag,
//!   the keys of the operand cells, and optional scalar atoms. Two
//!   expression cells built from the same operands compare equal and share
//!   their runtime state once both are active.
//!
//! # Invariants
//!
//! 1. `a == b` implies `hash(a) == hash(b)`.
//! 2. Unique keys are never reused within a process.
//! 3. Composite equality is structural: tag, operand keys and atoms all
//!    compare equal.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a cell.
///
/// Composite keys drive state sharing: stateful cells with equal composite
/// keys resolve to the same state object while active.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Identity-based key, unique per construction.
    Unique(u64),
    /// Structural key: operator tag plus operand keys plus scalar atoms.
    Composite(Rc<CompositeKey>),
}

/// Interior of a structural key.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    tag: &'static str,
    operands: Vec<Key>,
    atoms: Vec<KeyAtom>,
}

/// Scalar values that can distinguish otherwise identical composite keys
/// (option flags, type names).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyAtom {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl Key {
    /// Mint a fresh identity-based key.
    #[must_use]
    pub fn unique() -> Self {
        Key::Unique(NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a structural key from an operator tag and operand keys.
    #[must_use]
    pub fn composite(tag: &'static str, operands: Vec<Key>) -> Self {
        Key::composite_with(tag, operands, Vec::new())
    }

    /// Build a structural key carrying extra scalar atoms.
    #[must_use]
    pub fn composite_with(tag: &'static str, operands: Vec<Key>, atoms: Vec<KeyAtom>) -> Self {
        Key::Composite(Rc::new(CompositeKey {
            tag,
            operands,
            atoms,
        }))
    }

    /// Whether cells with this key share runtime state.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Key::Composite(_))
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Unique(id) => write!(f, "Key#{id}"),
            Key::Composite(inner) => {
                write!(f, "Key({}", inner.tag)?;
                for op in &inner.operands {
                    write!(f, " {op:?}")?;
                }
                for atom in &inner.atoms {
                    write!(f, " {atom:?}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &Key) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn unique_keys_differ() {
        assert_ne!(Key::unique(), Key::unique());
    }

    #[test]
    fn composite_keys_structural_equality() {
        let a = Key::unique();
        let b = Key::unique();

        let k1 = Key::composite("add", vec![a.clone(), b.clone()]);
        let k2 = Key::composite("add", vec![a.clone(), b.clone()]);

        assert_eq!(k1, k2);
        assert_eq!(hash_of(&k1), hash_of(&k2));
    }

    #[test]
    fn composite_keys_differ_by_tag() {
        let a = Key::unique();
        let b = Key::unique();

        let add = Key::composite("add", vec![a.clone(), b.clone()]);
        let sub = Key::composite("sub", vec![a, b]);

        assert_ne!(add, sub);
    }

    #[test]
    fn composite_keys_differ_by_operand_order() {
        let a = Key::unique();
        let b = Key::unique();

        let ab = Key::composite("add", vec![a.clone(), b.clone()]);
        let ba = Key::composite("add", vec![b, a]);

        assert_ne!(ab, ba);
    }

    #[test]
    fn atoms_distinguish_keys() {
        let a = Key::unique();

        let k1 = Key::composite_with("waited", vec![a.clone()], vec![KeyAtom::Bool(true)]);
        let k2 = Key::composite_with("waited", vec![a.clone()], vec![KeyAtom::Bool(false)]);
        let k3 = Key::composite_with("waited", vec![a], vec![KeyAtom::Bool(true)]);

        assert_ne!(k1, k2);
        assert_eq!(k1, k3);
    }

    #[test]
    fn nested_composites() {
        let a = Key::unique();
        let b = Key::unique();

        let inner1 = Key::composite("mul", vec![a.clone(), b.clone()]);
        let inner2 = Key::composite("mul", vec![a.clone(), b.clone()]);

        let outer1 = Key::composite("add", vec![inner1, a.clone()]);
        let outer2 = Key::composite("add", vec![inner2, a]);

        assert_eq!(outer1, outer2);
        assert_eq!(hash_of(&outer1), hash_of(&outer2));
    }

    #[test]
    fn shared_flag() {
        assert!(!Key::unique().is_shared());
        assert!(Key::composite("peek", vec![Key::unique()]).is_shared());
    }
}
