// LockedHashMap integration test suite.
//
// Each test documents what behavior is being verified. The core invariants
// exercised:
// - Uniqueness: re-inserting a key overwrites and never changes len().
// - Retrieval: get() returns the most recent value; absent keys are None.
// - Resize transparency: crossing many load-factor thresholds loses nothing.
// - Destructor accounting: exactly one call per released value.
// - Merge: append() is a union with the source winning; the source's
//   destructor never fires on transferred values.
// - Panic safety: a destructor or conflict action that panics leaves the
//   map structurally valid and usable.
use locked_containers::{LockedHashMap, StrMap, U64Map, INITIAL_CAPACITY};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter() -> (Arc<AtomicUsize>, impl FnMut(Arc<String>) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move |_v: Arc<String>| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// Test: the a/b/a scenario with boxed values.
// Verifies: size 2, latest value for "a", old value destroyed, "c" absent.
#[test]
fn overwrite_scenario() {
    let (destroyed, d) = counter();
    let m: StrMap<Arc<String>> = LockedHashMap::with_destructor(d);
    m.insert("a", Arc::new("1".to_string()));
    m.insert("b", Arc::new("2".to_string()));
    m.insert("a", Arc::new("3".to_string()));

    assert_eq!(m.len(), 2);
    assert_eq!(m.get("a").as_deref().map(String::as_str), Some("3"));
    assert_eq!(m.get("b").as_deref().map(String::as_str), Some("2"));
    assert!(m.get("c").is_none());
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

// Test: uniqueness under repeated inserts.
// Verifies: N distinct keys give len N; re-inserting any of them keeps N.
#[test]
fn len_counts_distinct_keys() {
    let m: StrMap<usize> = LockedHashMap::default();
    for i in 0..200 {
        m.insert(format!("key-{i}"), i);
    }
    assert_eq!(m.len(), 200);
    for i in (0..200).step_by(3) {
        m.insert(format!("key-{i}"), i * 10);
    }
    assert_eq!(m.len(), 200);
    assert_eq!(m.get("key-3"), Some(30));
    assert_eq!(m.get("key-4"), Some(4));
}

// Test: resize transparency.
// Verifies: 1000 keys into a 16-bucket map all remain retrievable.
#[test]
fn thousand_keys_survive_resizes() {
    let m: StrMap<u32> = LockedHashMap::new();
    assert_eq!(m.capacity(), INITIAL_CAPACITY);
    for i in 0..1000u32 {
        m.insert(format!("k{i:04}"), i);
    }
    assert_eq!(m.len(), 1000);
    assert_eq!(m.capacity(), 2048);
    for i in 0..1000u32 {
        assert_eq!(m.get(&format!("k{i:04}")), Some(i), "lost k{i:04}");
    }
    assert!(m.get("k1000").is_none());
}

// Test: removal semantics.
// Verifies: remove() of a present key shrinks len by one and the key is
// gone; removing an absent key is a no-op.
#[test]
fn remove_present_and_absent() {
    let m: U64Map<&'static str> = LockedHashMap::new();
    m.insert(1, "one");
    m.insert(2, "two");
    assert!(m.remove(&1));
    assert_eq!(m.len(), 1);
    assert!(m.get(&1).is_none());
    assert!(!m.remove(&1));
    assert!(!m.remove(&99));
    assert_eq!(m.len(), 1);
}

// Test: destructor count on clear and drop.
// Verifies: K live values produce exactly K calls.
#[test]
fn destructor_counts_on_clear_and_drop() {
    let (destroyed, d) = counter();
    let m: U64Map<Arc<String>> = LockedHashMap::with_destructor(d);
    for i in 0..37u64 {
        m.insert(i, Arc::new(i.to_string()));
    }
    m.clear();
    assert_eq!(destroyed.load(Ordering::SeqCst), 37);

    for i in 0..5u64 {
        m.insert(i, Arc::new(i.to_string()));
    }
    drop(m);
    assert_eq!(destroyed.load(Ordering::SeqCst), 42);
}

// Test: values shared with the caller are released by the map, not freed.
// Verifies: after clear(), the caller's Arc is the only owner left.
#[test]
fn map_releases_its_references() {
    let shared = Arc::new("shared".to_string());
    let m: StrMap<Arc<String>> = LockedHashMap::new();
    m.insert("x", Arc::clone(&shared));
    m.insert("y", Arc::clone(&shared));
    assert_eq!(Arc::strong_count(&shared), 3);
    m.clear();
    assert_eq!(Arc::strong_count(&shared), 1);
}

// Test: merge semantics.
// Verifies: union of keys, src wins, no double destruction after dropping src.
#[test]
fn append_union_without_double_destroy() {
    let (dst_destroyed, dd) = counter();
    let (src_destroyed, sd) = counter();
    let dst: StrMap<Arc<String>> = LockedHashMap::with_destructor(dd);
    let src: StrMap<Arc<String>> = LockedHashMap::with_destructor(sd);
    for k in ["a", "b", "c"] {
        dst.insert(k, Arc::new(format!("dst-{k}")));
    }
    for k in ["c", "d"] {
        src.insert(k, Arc::new(format!("src-{k}")));
    }

    dst.append(&src);
    drop(src);
    assert_eq!(src_destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(dst.len(), 4);
    assert_eq!(dst.get("c").as_deref().map(String::as_str), Some("src-c"));
    assert_eq!(dst.get("d").as_deref().map(String::as_str), Some("src-d"));
    // Only the overwritten "dst-c" has been released so far.
    assert_eq!(dst_destroyed.load(Ordering::SeqCst), 1);

    drop(dst);
    assert_eq!(dst_destroyed.load(Ordering::SeqCst), 5);
}

// Test: merge with accumulation.
// Verifies: conflict action sums counts instead of overwriting.
#[test]
fn append_with_sums_word_counts() {
    let count_words = |text: &str| {
        let m: StrMap<u32> = LockedHashMap::new();
        for w in text.split_whitespace() {
            let n = m.get(w).unwrap_or(0);
            m.insert(w, n + 1);
        }
        m
    };
    let total = count_words("the cat sat on the mat");
    let more = count_words("the dog sat");
    total.append_with(&more, |d, s| *d += s);

    assert_eq!(total.get("the"), Some(3));
    assert_eq!(total.get("sat"), Some(2));
    assert_eq!(total.get("dog"), Some(1));
    assert_eq!(total.get("cat"), Some(1));
    assert_eq!(total.len(), 6);
}

// Test: opposite-direction merges from two threads.
// Verifies: address-ordered locking means neither thread deadlocks.
#[test]
fn crossed_appends_do_not_deadlock() {
    let a: U64Map<u64> = LockedHashMap::new();
    let b: U64Map<u64> = LockedHashMap::new();
    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..500u64 {
                a.insert(i, i);
                a.append(&b);
            }
        });
        s.spawn(|| {
            for i in 500..1000u64 {
                b.insert(i, i);
                b.append(&a);
            }
        });
    });
    // Every key ended up in exactly one of the two maps.
    assert_eq!(a.len() + b.len(), 1000);
    for i in 0..1000u64 {
        assert!(a.contains_key(&i) != b.contains_key(&i), "key {i}");
    }
}

// Test: debug-only detection of re-entry from a value destructor.
// Verifies: the die hook is reached instead of a self-deadlock.
#[cfg(debug_assertions)]
#[test]
fn reentrant_destructor_reports() {
    use locked_containers::Unwind;

    let m: Arc<StrMap<u8>> = Arc::new(LockedHashMap::with_handler(Arc::new(Unwind)));
    let weak = Arc::downgrade(&m);
    m.set_value_destructor(Some(Box::new(move |_: u8| {
        if let Some(map) = weak.upgrade() {
            map.contains_key("anything");
        }
    })));
    m.insert("k", 1);
    let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        m.insert("k", 2);
    }));
    assert!(res.is_err(), "expected reentrancy to be reported");
    m.set_value_destructor(None);
    assert_eq!(m.get("k"), Some(2));
}

/// A destructor that panics on its first call and counts the rest.
fn fails_once(released: &Arc<AtomicUsize>) -> impl FnMut(u64) + Send + 'static {
    let released = Arc::clone(released);
    let mut armed = true;
    move |_v: u64| {
        if std::mem::take(&mut armed) {
            panic!("value destructor failed");
        }
        released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Checks a map that survived a panic still behaves: consistent len,
/// power-of-two capacity, and working insert/get across a resize.
fn assert_still_usable(m: &U64Map<u64>) {
    let cap = m.capacity();
    assert!(cap.is_power_of_two() && cap >= INITIAL_CAPACITY, "capacity {cap}");
    let len = m.len();
    let mut visited = 0;
    m.for_each(|_, _| visited += 1);
    assert_eq!(visited, len);

    for k in 1_000_000..1_000_064u64 {
        m.insert(k, k + 1);
    }
    assert_eq!(m.len(), len + 64);
    for k in 1_000_000..1_000_064u64 {
        assert_eq!(m.get(&k), Some(k + 1));
    }
    assert!(m.capacity().is_power_of_two());
}

// Test: a destructor panicking in the middle of clear().
// Verifies: the map is already empty with its initial capacity, so lookups
// of the old keys miss instead of touching released entries.
#[test]
fn clear_survives_panicking_destructor() {
    let released = Arc::new(AtomicUsize::new(0));
    let m: U64Map<u64> = LockedHashMap::with_destructor(fails_once(&released));
    for k in 0..20u64 {
        m.insert(k, k);
    }
    assert_eq!(m.capacity(), 32);

    assert!(catch_unwind(AssertUnwindSafe(|| m.clear())).is_err());
    assert_eq!(m.len(), 0);
    assert_eq!(m.capacity(), INITIAL_CAPACITY);
    for k in 0..20u64 {
        assert!(m.get(&k).is_none(), "key {k} outlived clear");
    }
    m.insert(1, 10);
    assert_eq!(m.get(&1), Some(10));
    assert_still_usable(&m);
}

// Test: a destructor re-entering the map during clear(), with an unwinding
// handler.
// Verifies: the violation is reported and the map is left empty and usable.
#[cfg(debug_assertions)]
#[test]
fn clear_survives_reentrant_destructor() {
    use locked_containers::Unwind;

    let m: Arc<U64Map<u64>> = Arc::new(LockedHashMap::with_handler(Arc::new(Unwind)));
    let weak = Arc::downgrade(&m);
    m.set_value_destructor(Some(Box::new(move |_: u64| {
        if let Some(map) = weak.upgrade() {
            map.len();
        }
    })));
    for k in 0..8u64 {
        m.insert(k, k);
    }
    assert!(catch_unwind(AssertUnwindSafe(|| m.clear())).is_err());
    m.set_value_destructor(None);
    assert_eq!(m.len(), 0);
    assert_still_usable(&m);
}

// Test: a destructor panicking inside remove().
// Verifies: the entry is already unlinked and every other key survives.
#[test]
fn remove_survives_panicking_destructor() {
    let released = Arc::new(AtomicUsize::new(0));
    let m: U64Map<u64> = LockedHashMap::with_destructor(fails_once(&released));
    for k in 0..10u64 {
        m.insert(k, k * 3);
    }
    let gone = 4u64;
    assert!(catch_unwind(AssertUnwindSafe(|| m.remove(&gone))).is_err());
    assert_eq!(m.len(), 9);
    assert!(!m.contains_key(&gone));
    for k in (0..10u64).filter(|&k| k != gone) {
        assert_eq!(m.get(&k), Some(k * 3));
    }
    assert!(m.remove(&5));
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_still_usable(&m);
}

// Test: the destination's destructor panics on the first value that
// append() overwrites.
// Verifies: every source entry already landed in the destination and the
// source is empty; no entry is lost from either side.
#[test]
fn append_survives_panicking_destructor() {
    let released = Arc::new(AtomicUsize::new(0));
    let dst: U64Map<u64> = LockedHashMap::with_destructor(fails_once(&released));
    let src: U64Map<u64> = LockedHashMap::new();
    for k in 0..10u64 {
        dst.insert(k, k);
    }
    for k in 5..30u64 {
        src.insert(k, k + 100);
    }

    assert!(catch_unwind(AssertUnwindSafe(|| dst.append(&src))).is_err());
    assert_eq!(dst.len(), 30);
    for k in 0..5u64 {
        assert_eq!(dst.get(&k), Some(k));
    }
    for k in 5..30u64 {
        assert_eq!(dst.get(&k), Some(k + 100), "key {k}");
    }
    assert_eq!(src.len(), 0);
    assert_eq!(src.capacity(), INITIAL_CAPACITY);
    assert_still_usable(&dst);
    assert_still_usable(&src);
}

// Test: append_with() whose conflict action panics on its first call.
// Verifies: non-conflicting source entries are all present, conflicting
// keys keep the destination's value, and both maps stay usable.
#[test]
fn append_with_survives_panicking_conflict_action() {
    let dst: U64Map<u64> = LockedHashMap::new();
    let src: U64Map<u64> = LockedHashMap::new();
    for k in 0..10u64 {
        dst.insert(k, k);
    }
    for k in 5..30u64 {
        src.insert(k, k + 100);
    }

    let res = catch_unwind(AssertUnwindSafe(|| {
        dst.append_with(&src, |_, _| panic!("conflict action failed"));
    }));
    assert!(res.is_err());
    assert_eq!(dst.len(), 30);
    for k in 0..10u64 {
        assert_eq!(dst.get(&k), Some(k), "key {k}");
    }
    for k in 10..30u64 {
        assert_eq!(dst.get(&k), Some(k + 100), "key {k}");
    }
    assert!(src.is_empty());
    assert_still_usable(&dst);
    assert_still_usable(&src);
}

// Test: integer keys are passed by value, borrowed keys are copied on demand.
// Verifies: both argument forms address the same entry.
#[test]
fn insert_accepts_owned_and_borrowed_keys() {
    let ints: U64Map<&'static str> = LockedHashMap::new();
    let k = 42u64;
    ints.insert(k, "owned");
    ints.insert(&k, "borrowed");
    assert_eq!(ints.len(), 1);
    assert_eq!(ints.get(&k), Some("borrowed"));

    let strs: StrMap<u8> = LockedHashMap::new();
    let owned = String::from("key");
    strs.insert("key", 1);
    strs.insert(&owned, 2);
    strs.insert(owned.clone(), 3);
    assert_eq!(strs.len(), 1);
    assert_eq!(strs.get("key"), Some(3));
}
