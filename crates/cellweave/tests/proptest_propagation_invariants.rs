//! Property tests for the propagation invariants: consistency of computed
//! values under arbitrary write sequences, once-per-batch delivery, and
//! activation balance.

mod common;

use std::cell::Cell as StdCell;
use std::rc::Rc;

use proptest::prelude::*;

use cellweave::{batch, computed, mutable, watch, Cell};

proptest! {
    /// After every propagation wave, an observed computed cell equals
    /// what its compute function returns from current inputs.
    #[test]
    fn computed_consistency_under_random_writes(
        writes in prop::collection::vec((0usize..3, -100i64..100i64), 1..40)
    ) {
        let cells = [mutable(0i64), mutable(0i64), mutable(0i64)];

        let (c0, c1, c2) = (cells[0].clone(), cells[1].clone(), cells[2].clone());
        let total = computed(move || Ok(c0.call()? + c1.call()? + c2.call()?));

        let t2 = total.clone();
        let _w = watch(move || {
            let _ = t2.call()?;
            Ok(())
        });

        let mut expected = [0i64; 3];
        for (index, value) in writes {
            cells[index].set(value);
            expected[index] = value;
            prop_assert_eq!(total.value(), expected.iter().sum::<i64>());
        }
    }

    /// A diamond-shaped graph never shows a mixed snapshot: every
    /// observation of the join equals the value derived from one input
    /// state.
    #[test]
    fn diamond_observations_are_consistent(
        writes in prop::collection::vec(-50i64..50i64, 1..30)
    ) {
        let a = mutable(0i64);

        let a2 = a.clone();
        let left = computed(move || Ok(a2.call()? + 1));
        let a3 = a.clone();
        let right = computed(move || Ok(a3.call()? * 2));

        let (l2, r2) = (left.clone(), right.clone());
        let join = computed(move || Ok(l2.call()? + r2.call()?));

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let (j2, seen2) = (join.clone(), seen.clone());
        let _w = watch(move || {
            seen2.borrow_mut().push(j2.call()?);
            Ok(())
        });

        let mut inputs = vec![0i64];
        for value in writes {
            let changed = value != *inputs.last().unwrap();
            a.set(value);
            if changed {
                inputs.push(value);
            }
        }

        // Each observation corresponds to exactly one input value.
        let expected: Vec<i64> = inputs.iter().map(|v| (v + 1) + (v * 2)).collect();
        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    /// Within a batch, an observer fires at most once, and only when
    /// something actually changed.
    #[test]
    fn batch_delivers_at_most_once(
        writes in prop::collection::vec((0usize..3, -100i64..100i64), 0..20)
    ) {
        let cells = [mutable(0i64), mutable(0i64), mutable(0i64)];

        let fired = Rc::new(StdCell::new(0u32));
        let (c0, c1, c2) = (cells[0].clone(), cells[1].clone(), cells[2].clone());
        let fired2 = fired.clone();
        let _w = watch(move || {
            let _ = (c0.call()?, c1.call()?, c2.call()?);
            fired2.set(fired2.get() + 1);
            Ok(())
        });

        prop_assert_eq!(fired.get(), 1); // discovery run

        let mut final_values = [0i64; 3];
        let mut any_change = false;
        batch(|| {
            for (index, value) in writes {
                if final_values[index] != value {
                    any_change = true;
                }
                final_values[index] = value;
                cells[index].set(value);
            }
        });

        let expected = 1 + u32::from(any_change);
        prop_assert_eq!(fired.get(), expected);

        for (cell, value) in cells.iter().zip(final_values) {
            prop_assert_eq!(cell.value(), value);
        }
    }

    /// Stopped watches leave no live subscriptions behind: further
    /// writes recompute nothing.
    #[test]
    fn activation_balance_after_watch_churn(
        watch_count in 1usize..6,
        writes in prop::collection::vec(-100i64..100i64, 1..10)
    ) {
        let a = mutable(0i64);
        let computes = Rc::new(StdCell::new(0u32));

        let (a2, n) = (a.clone(), computes.clone());
        let derived = computed(move || {
            n.set(n.get() + 1);
            Ok(a2.call()? + 1)
        });

        let watches: Vec<_> = (0..watch_count)
            .map(|_| {
                let d = derived.clone();
                watch(move || {
                    let _ = d.call()?;
                    Ok(())
                })
            })
            .collect();

        // One activation regardless of the number of watches.
        prop_assert_eq!(computes.get(), 1);

        for w in watches {
            w.stop();
        }

        let after_stop = computes.get();
        for value in writes {
            a.set(value);
        }
        prop_assert_eq!(computes.get(), after_stop);
    }
}
