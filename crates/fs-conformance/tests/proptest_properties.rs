#![forbid(unsafe_code)]

//! Property-based suite for the index/builder algebra.
//!
//! Strategy generators produce arbitrary duplicate-free key sets (ordered
//! and unordered) with optional cell vectors; properties assert the
//! universal laws that must hold for ALL inputs, not just hand-picked
//! fixtures.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use fs_builder::IndexBuilder;
use fs_conformance::{ArrayVector, ArrayVectorBuilder};
use fs_index::{Index, Lookup};
use fs_types::{Address, BoundaryBehavior};
use fs_vector::{Transform, VectorBuilder, VectorPlan};

fn builder() -> IndexBuilder<ArrayVectorBuilder> {
    IndexBuilder::new(ArrayVectorBuilder)
}

fn input<V>(slot: usize) -> VectorPlan<V> {
    VectorPlan::Return { source: slot }
}

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// Duplicate-free key vector in arbitrary order.
fn arb_keys(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-50_i64..50, 0..max_len).prop_map(|raw| {
        let mut seen = HashSet::new();
        raw.into_iter().filter(|key| seen.insert(*key)).collect()
    })
}

/// Duplicate-free strictly ascending key vector.
fn arb_sorted_keys(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    arb_keys(max_len).prop_map(|mut keys| {
        keys.sort_unstable();
        keys
    })
}

/// Cell vector with some missing cells, sized to its index.
fn arb_cells(len: usize) -> impl Strategy<Value = Vec<Option<i32>>> {
    proptest::collection::vec(
        prop_oneof![3 => (-1000_i32..1000).prop_map(Some), 1 => Just(None)],
        len..=len,
    )
}

fn arb_index(max_len: usize) -> impl Strategy<Value = Index<i64>> {
    arb_keys(max_len).prop_map(|keys| Index::from_keys(keys).expect("keys are deduplicated"))
}

fn arb_sorted_index(max_len: usize) -> impl Strategy<Value = Index<i64>> {
    arb_sorted_keys(max_len)
        .prop_map(|keys| Index::from_keys(keys).expect("keys are deduplicated"))
}

fn arb_indexed_cells(max_len: usize) -> impl Strategy<Value = (Index<i64>, Vec<Option<i32>>)> {
    arb_keys(max_len).prop_flat_map(|keys| {
        let index = Index::from_keys(keys).expect("keys are deduplicated");
        arb_cells(index.len()).prop_map(move |cells| (index.clone(), cells))
    })
}

fn arb_sorted_indexed_cells(
    max_len: usize,
) -> impl Strategy<Value = (Index<i64>, Vec<Option<i32>>)> {
    arb_sorted_keys(max_len).prop_flat_map(|keys| {
        let index = Index::from_keys(keys).expect("keys are deduplicated");
        arb_cells(index.len()).prop_map(move |cells| (index.clone(), cells))
    })
}

/// Sorted non-empty index plus two bound keys drawn from its own key set.
fn arb_sorted_index_with_two_keys() -> impl Strategy<Value = (Index<i64>, i64, i64)> {
    arb_sorted_keys(20)
        .prop_filter("bounds need at least one key", |keys| !keys.is_empty())
        .prop_flat_map(|keys| {
            let len = keys.len();
            (Just(keys), 0..len, 0..len).prop_map(|(keys, a, b)| {
                let lower = keys[a];
                let upper = keys[b];
                let index = Index::from_keys(keys).expect("keys are deduplicated");
                (index, lower, upper)
            })
        })
}

// ---------------------------------------------------------------------------
// Law 1: address bijectivity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn addresses_form_a_bijection(index in arb_index(24)) {
        let mut seen = HashSet::new();
        for key in index.keys() {
            let address = index.address_of(key).expect("every key resolves");
            prop_assert!(address.offset() < index.len());
            prop_assert!(seen.insert(address));
            prop_assert_eq!(index.key_at(address), Some(key));
        }
        prop_assert_eq!(seen.len(), index.len());
    }
}

// ---------------------------------------------------------------------------
// Laws 2 and 3: union ordering and key-set commutativity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn ordered_union_of_ordered_inputs_is_strictly_sorted(
        left in arb_sorted_index(16),
        right in arb_sorted_index(16),
    ) {
        let builder = builder();
        let (merged, _, _) = builder
            .union((&left, &input::<i32>(0)), (&right, &input(1)))
            .expect("union");
        prop_assert!(merged.is_ordered());
        prop_assert!(merged.keys().windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn union_key_sets_commute(left in arb_index(16), right in arb_index(16)) {
        let builder = builder();
        let (ab, _, _) = builder
            .union((&left, &input::<i32>(0)), (&right, &input(1)))
            .expect("union");
        let (ba, _, _) = builder
            .union((&right, &input::<i32>(0)), (&left, &input(1)))
            .expect("union");
        let ab_keys: BTreeSet<i64> = ab.keys().iter().copied().collect();
        let ba_keys: BTreeSet<i64> = ba.keys().iter().copied().collect();
        prop_assert_eq!(ab_keys, ba_keys);
    }
}

// ---------------------------------------------------------------------------
// Law 4: intersect against union
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn intersect_is_a_subset_of_union_and_equals_set_intersection(
        left in arb_index(16),
        right in arb_index(16),
    ) {
        let builder = builder();
        let (union_index, _, _) = builder
            .union((&left, &input::<i32>(0)), (&right, &input(1)))
            .expect("union");
        let (intersect_index, _, _) = builder
            .intersect((&left, &input::<i32>(0)), (&right, &input(1)))
            .expect("intersect");

        let union_keys: BTreeSet<i64> = union_index.keys().iter().copied().collect();
        let intersect_keys: BTreeSet<i64> = intersect_index.keys().iter().copied().collect();
        prop_assert!(intersect_keys.is_subset(&union_keys));

        let left_keys: BTreeSet<i64> = left.keys().iter().copied().collect();
        let right_keys: BTreeSet<i64> = right.keys().iter().copied().collect();
        let expected: BTreeSet<i64> = left_keys.intersection(&right_keys).copied().collect();
        prop_assert_eq!(intersect_keys, expected);
    }
}

// ---------------------------------------------------------------------------
// Law 5: append distributes over combine
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn append_plan_equals_combined_union_plans(
        (left, left_cells) in arb_indexed_cells(12),
        (right, right_cells) in arb_indexed_cells(12),
    ) {
        // ExactlyOne would reject overlapping keys; PreferLeft is total.
        let builder = builder();
        let inputs = [
            ArrayVector::from_cells(left_cells),
            ArrayVector::from_cells(right_cells),
        ];

        let (_, append_plan) = builder
            .append(
                (&left, &input(0)),
                (&right, &input(1)),
                Transform::PreferLeft,
            )
            .expect("append");
        let (_, union_left, union_right) = builder
            .union((&left, &input(0)), (&right, &input(1)))
            .expect("union");

        let appended = ArrayVectorBuilder.build(&append_plan, &inputs).expect("append");
        let combined = ArrayVectorBuilder
            .build(
                &VectorPlan::combine(union_left, union_right, Transform::PreferLeft),
                &inputs,
            )
            .expect("combine");
        prop_assert_eq!(appended, combined);
    }
}

// ---------------------------------------------------------------------------
// Law 6: reindex round-trip
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn reindex_onto_itself_is_extensionally_identity(
        (index, cells) in arb_indexed_cells(16),
    ) {
        let builder = builder();
        let vector = ArrayVector::from_cells(cells);
        let plan = builder.reindex(&index, &index, Lookup::Exact, &input(0), |_| true);
        let out = ArrayVectorBuilder
            .build(&plan, std::slice::from_ref(&vector))
            .expect("reindex");
        prop_assert_eq!(out, vector);
    }
}

// ---------------------------------------------------------------------------
// Law 7: order idempotence
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn ordering_twice_equals_ordering_once(
        (index, cells) in arb_indexed_cells(16),
    ) {
        let builder = builder();
        let vector = ArrayVector::from_cells(cells);

        let (once, once_plan) = builder.order(&index, &input(0)).expect("order");
        let (twice, twice_plan) = builder.order(&once, &once_plan).expect("order again");
        prop_assert_eq!(&once, &twice);

        let one_pass = ArrayVectorBuilder
            .build(&once_plan, std::slice::from_ref(&vector))
            .expect("one pass");
        let two_pass = ArrayVectorBuilder
            .build(&twice_plan, std::slice::from_ref(&vector))
            .expect("two passes");
        prop_assert_eq!(one_pass, two_pass);
    }
}

// ---------------------------------------------------------------------------
// Law 8: get-range slicing
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn inclusive_range_selects_keys_between_bounds(
        index in arb_sorted_index(20),
        lower in -60_i64..60,
        upper in -60_i64..60,
    ) {
        let builder = builder();
        let (sliced, _) = builder
            .get_range(
                &index,
                Some((&lower, BoundaryBehavior::Inclusive)),
                Some((&upper, BoundaryBehavior::Inclusive)),
                &input::<i32>(0),
            )
            .expect("range");
        let expected: Vec<i64> = index
            .keys()
            .iter()
            .copied()
            .filter(|key| lower <= *key && *key <= upper)
            .collect();
        prop_assert_eq!(sliced.keys(), expected.as_slice());
    }

    #[test]
    fn exclusive_bounds_drop_their_endpoints(
        (index, lower, upper) in arb_sorted_index_with_two_keys(),
    ) {
        // Exclusive bounds cut at the resolved nearest key, so the sampled
        // bounds are always keys of the index itself.
        let builder = builder();
        let (sliced, _) = builder
            .get_range(
                &index,
                Some((&lower, BoundaryBehavior::Exclusive)),
                Some((&upper, BoundaryBehavior::Exclusive)),
                &input::<i32>(0),
            )
            .expect("range");
        let expected: Vec<i64> = index
            .keys()
            .iter()
            .copied()
            .filter(|key| lower < *key && *key < upper)
            .collect();
        prop_assert_eq!(sliced.keys(), expected.as_slice());
    }
}

// ---------------------------------------------------------------------------
// Lookup coherence: nearest semantics agree with a linear scan
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn nearest_lookup_matches_linear_scan(
        (index, cells) in arb_sorted_indexed_cells(16),
        target in -60_i64..60,
    ) {
        let vector = ArrayVector::from_cells(cells);

        let smaller = index.lookup(&target, Lookup::NearestSmaller, vector.present());
        let expected_smaller = index
            .mappings()
            .filter(|(key, address)| **key <= target && vector.get(*address).is_some())
            .last()
            .map(|(key, address)| (*key, address));
        prop_assert_eq!(smaller, expected_smaller);

        let greater = index.lookup(&target, Lookup::NearestGreater, vector.present());
        let expected_greater = index
            .mappings()
            .find(|(key, address)| **key >= target && vector.get(*address).is_some())
            .map(|(key, address)| (*key, address));
        prop_assert_eq!(greater, expected_greater);
    }
}

// ---------------------------------------------------------------------------
// Relocation plans never collide on targets
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn merge_relocations_satisfy_the_plan_contract(
        left in arb_index(16),
        right in arb_index(16),
    ) {
        let builder = builder();
        let (_, left_plan, right_plan) = builder
            .union((&left, &input::<i32>(0)), (&right, &input(1)))
            .expect("union");
        prop_assert!(fs_vector::validate_plan(&left_plan).is_ok());
        prop_assert!(fs_vector::validate_plan(&right_plan).is_ok());
    }
}

// ---------------------------------------------------------------------------
// Address arithmetic sanity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn generated_ranges_are_inclusive_and_directional(
        lo in 0_usize..64,
        hi in 0_usize..64,
    ) {
        let seq: Vec<usize> = fs_types::generate_range(Address::new(lo), Address::new(hi))
            .map(Address::offset)
            .collect();
        prop_assert_eq!(seq.first().copied(), Some(lo));
        prop_assert_eq!(seq.last().copied(), Some(hi));
        prop_assert_eq!(seq.len(), lo.abs_diff(hi) + 1);
    }
}
