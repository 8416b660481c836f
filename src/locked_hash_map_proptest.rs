#![cfg(test)]

// Property tests for LockedHashMap kept inside the crate so they can check
// the internal chain structure as well as the public surface.

use crate::locked_hash_map::{LockedHashMap, StrMap, U64Map, INITIAL_CAPACITY, LOAD_FACTOR};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Remove(usize),
    Take(usize),
    Get(usize),
    Contains(String),
    Bump(usize),
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=12).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::Take),
            2 => idx.clone().prop_map(OpI::Get),
            1 => "[a-z]{0,5}".prop_map(OpI::Contains),
            1 => idx.clone().prop_map(OpI::Bump),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: state-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Keys are unique; `len` matches the model after every operation.
// - `get` returns the most recent value; absent keys are `None`.
// - The destructor fires once per overwrite, remove and clear of a live value.
// - Capacity is a power of two >= 16 and the load factor stays <= 0.7.
// - `for_each` yields each live key exactly once.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&destroyed);
        let sut: StrMap<i32> = LockedHashMap::with_destructor(move |_: i32| {
            d.fetch_add(1, Ordering::Relaxed);
        });
        let mut model: HashMap<String, i32> = HashMap::new();
        let mut expected_destroyed = 0usize;

        for op in ops {
            match op {
                OpI::Insert(i, v) => {
                    if model.insert(pool[i].clone(), v).is_some() {
                        expected_destroyed += 1;
                    }
                    sut.insert(pool[i].as_str(), v);
                }
                OpI::Remove(i) => {
                    let was = model.remove(&pool[i]).is_some();
                    if was {
                        expected_destroyed += 1;
                    }
                    prop_assert_eq!(sut.remove(pool[i].as_str()), was);
                }
                OpI::Take(i) => {
                    prop_assert_eq!(sut.take(pool[i].as_str()), model.remove(&pool[i]));
                }
                OpI::Get(i) => {
                    prop_assert_eq!(sut.get(pool[i].as_str()), model.get(&pool[i]).copied());
                }
                OpI::Contains(s) => {
                    prop_assert_eq!(sut.contains_key(s.as_str()), model.contains_key(&s));
                }
                OpI::Bump(i) => {
                    let seen = sut.get_with(pool[i].as_str(), |v| v.wrapping_add(1));
                    prop_assert_eq!(seen, model.get(&pool[i]).map(|v| v.wrapping_add(1)));
                }
                OpI::Clear => {
                    expected_destroyed += model.len();
                    model.clear();
                    sut.clear();
                    prop_assert_eq!(sut.capacity(), INITIAL_CAPACITY);
                }
            }

            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.is_empty(), model.is_empty());
            prop_assert_eq!(destroyed.load(Ordering::Relaxed), expected_destroyed);
            let cap = sut.capacity();
            prop_assert!(cap.is_power_of_two() && cap >= INITIAL_CAPACITY);
            prop_assert!(sut.len() as f64 / cap as f64 <= LOAD_FACTOR);
        }

        let mut keys = BTreeSet::new();
        let mut dup = false;
        sut.for_each(|k, v| {
            dup |= !keys.insert(k.clone());
            assert_eq!(model.get(k), Some(&*v));
        });
        prop_assert!(!dup, "a key was visited twice");
        prop_assert_eq!(keys, model.keys().cloned().collect::<BTreeSet<_>>());
    }
}

// Property: merging two integer-keyed maps equals the union of their models,
// with the source winning on conflicts and the source left empty.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_append_is_union(
        a in proptest::collection::vec((0u64..200, any::<u32>()), 0..80),
        b in proptest::collection::vec((0u64..200, any::<u32>()), 0..80),
        accumulate in any::<bool>(),
    ) {
        let dst: U64Map<u64> = LockedHashMap::new();
        let src: U64Map<u64> = LockedHashMap::new();
        let mut model: HashMap<u64, u64> = HashMap::new();
        let mut src_model: HashMap<u64, u64> = HashMap::new();
        for (k, v) in a {
            dst.insert(k, u64::from(v));
            model.insert(k, u64::from(v));
        }
        for (k, v) in b {
            src.insert(k, u64::from(v));
            src_model.insert(k, u64::from(v));
        }

        if accumulate {
            dst.append_with(&src, |d, s| *d += s);
            for (k, v) in src_model {
                *model.entry(k).or_insert(0) += v;
            }
        } else {
            dst.append(&src);
            model.extend(src_model);
        }

        prop_assert!(src.is_empty());
        prop_assert_eq!(dst.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(dst.get(k), Some(*v));
        }
    }
}

// Property: integer keys sharing their low bits (multiples of a power of
// two) stay retrievable across every resize.
proptest! {
    #[test]
    fn prop_clustered_integer_keys(shift in 4u32..20, n in 1usize..300) {
        let m: U64Map<usize> = LockedHashMap::new();
        for i in 0..n {
            m.insert((i as u64) << shift, i);
        }
        prop_assert_eq!(m.len(), n);
        for i in 0..n {
            prop_assert_eq!(m.get(&((i as u64) << shift)), Some(i));
        }
        prop_assert_eq!(m.get(&1), None);
    }
}
