//! LockedHashMap: separate-chaining hash map behind a single mutex.

use crate::failure::{self, FatalHandler, Violation};
use crate::key::{InsertKey, KeyHash, MapKey};
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use core::borrow::Borrow;
use core::ops::{Deref, DerefMut};
use parking_lot::{Mutex, MutexGuard};
use slotmap::{DefaultKey, SlotMap};
use std::sync::Arc;

/// Bucket count of a new or cleared map.
pub const INITIAL_CAPACITY: usize = 16;

/// Highest `len / capacity` ratio allowed after an insert.
pub const LOAD_FACTOR: f64 = 0.7;

/// Callback receiving values the map releases (overwrite, remove, clear, drop).
pub type Destructor<V> = Box<dyn FnMut(V) + Send>;

/// Map keyed by strings hashed with djb2.
pub type StrMap<V> = LockedHashMap<String, V>;

/// Map keyed by `u64`, the key being its own hash.
pub type U64Map<V> = LockedHashMap<u64, V>;

struct Node<K: MapKey, V> {
    key: K,
    value: V,
    hash: K::Cached,
    next: Option<DefaultKey>,
}

struct Table<K: MapKey, V> {
    // Chain heads; length is always a power of two.
    buckets: Vec<Option<DefaultKey>>,
    nodes: SlotMap<DefaultKey, Node<K, V>>,
    destructor: Option<Destructor<V>>,
}

#[track_caller]
fn empty_buckets(
    capacity: usize,
    handler: &dyn FatalHandler,
    op: &'static str,
) -> Vec<Option<DefaultKey>> {
    let mut buckets = Vec::new();
    if buckets.try_reserve_exact(capacity).is_err() {
        failure::die(
            handler,
            Violation::OutOfMemory {
                op,
                requested: capacity,
            },
        );
    }
    buckets.resize(capacity, None);
    buckets
}

impl<K: MapKey, V> Table<K, V> {
    #[track_caller]
    fn new(destructor: Option<Destructor<V>>, handler: &dyn FatalHandler) -> Self {
        Self {
            buckets: empty_buckets(INITIAL_CAPACITY, handler, "create"),
            nodes: SlotMap::with_key(),
            destructor,
        }
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash & (self.buckets.len() as u64 - 1)) as usize
    }

    fn release(&mut self, value: V) {
        if let Some(d) = self.destructor.as_mut() {
            d(value);
        }
    }

    fn find_in<Q>(&self, index: usize, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut cur = self.buckets[index];
        while let Some(k) = cur {
            let node = &self.nodes[k];
            if node.key.borrow() == q {
                return Some(k);
            }
            cur = node.next;
        }
        None
    }

    fn find<Q>(&self, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
    {
        self.find_in(self.bucket_of(q.key_hash()), q)
    }

    #[track_caller]
    fn resize(&mut self, handler: &dyn FatalHandler, op: &'static str) {
        let old_capacity = self.buckets.len();
        let new_capacity = old_capacity * 2;
        let old = core::mem::replace(
            &mut self.buckets,
            empty_buckets(new_capacity, handler, op),
        );
        for head in old {
            let mut cur = head;
            while let Some(k) = cur {
                let node = &mut self.nodes[k];
                cur = node.next;
                let hash = node.key.stored_hash(node.hash);
                let index = (hash & (new_capacity as u64 - 1)) as usize;
                node.next = self.buckets[index];
                self.buckets[index] = Some(k);
            }
        }
        log::trace!(
            "resized map from {} to {} buckets holding {} entries",
            old_capacity,
            new_capacity,
            self.nodes.len()
        );
    }

    /// Grow if one more entry would exceed the load factor, then find `q`.
    /// `Err` carries the bucket a new entry for `q` belongs to.
    #[track_caller]
    fn locate<Q>(
        &mut self,
        hash: u64,
        q: &Q,
        handler: &dyn FatalHandler,
        op: &'static str,
    ) -> Result<DefaultKey, usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        if (self.nodes.len() + 1) as f64 / self.buckets.len() as f64 > LOAD_FACTOR {
            self.resize(handler, op);
        }
        let index = self.bucket_of(hash);
        self.find_in(index, q).ok_or(index)
    }

    fn link(&mut self, index: usize, key: K, hash: u64, value: V) {
        let next = self.buckets[index];
        let k = self.nodes.insert(Node {
            key,
            value,
            hash: K::cache(hash),
            next,
        });
        self.buckets[index] = Some(k);
    }

    fn overwrite(&mut self, k: DefaultKey, value: V) {
        let old = core::mem::replace(&mut self.nodes[k].value, value);
        self.release(old);
    }

    fn unlink<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
    {
        let index = self.bucket_of(q.key_hash());
        let mut prev: Option<DefaultKey> = None;
        let mut cur = self.buckets[index];
        while let Some(k) = cur {
            let node = &self.nodes[k];
            let next = node.next;
            if node.key.borrow() == q {
                match prev {
                    Some(p) => self.nodes[p].next = next,
                    None => self.buckets[index] = next,
                }
                return self.nodes.remove(k).map(|n| n.value);
            }
            prev = Some(k);
            cur = next;
        }
        None
    }

    /// Hand detached values to the destructor. Values after one whose
    /// destructor panics are dropped without it.
    fn release_detached(&mut self, nodes: SlotMap<DefaultKey, Node<K, V>>) {
        for (_, node) in nodes {
            self.release(node.value);
        }
    }

    /// Return to the just-created state, then release the old values. The
    /// table is already consistent when the destructor runs.
    #[track_caller]
    fn reset(&mut self, handler: &dyn FatalHandler, op: &'static str) {
        self.buckets = empty_buckets(INITIAL_CAPACITY, handler, op);
        let nodes = core::mem::take(&mut self.nodes);
        self.release_detached(nodes);
    }

    /// Move every entry out, leaving a just-created table behind.
    #[track_caller]
    fn take_entries(
        &mut self,
        handler: &dyn FatalHandler,
        op: &'static str,
    ) -> Vec<(K, u64, V)> {
        let entries = self
            .nodes
            .drain()
            .map(|(_, n)| {
                let hash = n.key.stored_hash(n.hash);
                (n.key, hash, n.value)
            })
            .collect();
        self.buckets = empty_buckets(INITIAL_CAPACITY, handler, op);
        entries
    }
}

struct Locked<'a, K: MapKey, V> {
    // Declared first: the holder record must clear before the mutex unlocks.
    _reentrancy: ReentrancyGuard<'a>,
    table: MutexGuard<'a, Table<K, V>>,
}

impl<K: MapKey, V> Deref for Locked<'_, K, V> {
    type Target = Table<K, V>;
    fn deref(&self) -> &Table<K, V> {
        &self.table
    }
}

impl<K: MapKey, V> DerefMut for Locked<'_, K, V> {
    fn deref_mut(&mut self) -> &mut Table<K, V> {
        &mut self.table
    }
}

/// A thread-safe hash map with chained buckets.
///
/// Every operation, reads included, holds the map's single mutex for its
/// whole duration, so a resize is never observable. The lock is not
/// reentrant: calling back into the same map from a `for_each` action, the
/// value destructor or an `append_with` conflict action deadlocks (debug
/// builds report `Violation::Reentrant` instead).
pub struct LockedHashMap<K: MapKey, V> {
    table: Mutex<Table<K, V>>,
    reentrancy: DebugReentrancy,
    handler: Arc<dyn FatalHandler>,
}

impl<K: MapKey, V> LockedHashMap<K, V> {
    #[track_caller]
    pub fn new() -> Self {
        Self::with_parts(None, failure::default_handler())
    }

    /// New map handing released values to `destructor`.
    #[track_caller]
    pub fn with_destructor<F>(destructor: F) -> Self
    where
        F: FnMut(V) + Send + 'static,
    {
        Self::with_parts(Some(Box::new(destructor)), failure::default_handler())
    }

    /// New map reporting contract violations to `handler`.
    #[track_caller]
    pub fn with_handler(handler: Arc<dyn FatalHandler>) -> Self {
        Self::with_parts(None, handler)
    }

    #[track_caller]
    pub fn with_destructor_and_handler<F>(destructor: F, handler: Arc<dyn FatalHandler>) -> Self
    where
        F: FnMut(V) + Send + 'static,
    {
        Self::with_parts(Some(Box::new(destructor)), handler)
    }

    #[track_caller]
    fn with_parts(destructor: Option<Destructor<V>>, handler: Arc<dyn FatalHandler>) -> Self {
        Self {
            table: Mutex::new(Table::new(destructor, &*handler)),
            reentrancy: DebugReentrancy::new(),
            handler,
        }
    }

    #[track_caller]
    fn lock(&self, op: &'static str) -> Locked<'_, K, V> {
        let entered = self.reentrancy.enter(op, &*self.handler);
        let table = self.table.lock();
        Locked {
            _reentrancy: entered.acquired(),
            table,
        }
    }

    /// Replace (or with `None`, remove) the value destructor.
    #[track_caller]
    pub fn set_value_destructor(&self, destructor: Option<Destructor<V>>) {
        self.lock("set_value_destructor").destructor = destructor;
    }

    /// Insert or overwrite. An overwritten value goes to the destructor;
    /// a borrowed key (`&str`, `&u64`) is copied only when a new entry is
    /// created.
    #[track_caller]
    pub fn insert<A>(&self, key: A, value: V)
    where
        A: InsertKey<K>,
        K: Borrow<A::Query>,
    {
        let hash = key.query().key_hash();
        let mut t = self.lock("insert");
        match t.locate(hash, key.query(), &*self.handler, "insert") {
            Ok(k) => t.overwrite(k, value),
            Err(index) => t.link(index, key.into_key(), hash, value),
        }
    }

    /// A clone of the value stored under `key`.
    #[track_caller]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Run `f` on the value stored under `key` with the lock held.
    #[track_caller]
    pub fn get_with<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
        F: FnOnce(&V) -> R,
    {
        let t = self.lock("get");
        let k = t.find(key)?;
        Some(f(&t.nodes[k].value))
    }

    #[track_caller]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
    {
        self.lock("contains_key").find(key).is_some()
    }

    /// Remove `key`, handing its value to the destructor. Returns whether
    /// the key was present.
    #[track_caller]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
    {
        let mut t = self.lock("remove");
        match t.unlink(key) {
            Some(v) => {
                t.release(v);
                true
            }
            None => false,
        }
    }

    /// Remove `key` and return its value to the caller; the destructor is
    /// not invoked.
    #[track_caller]
    pub fn take<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + KeyHash + Eq,
    {
        self.lock("take").unlink(key)
    }

    #[track_caller]
    pub fn len(&self) -> usize {
        self.lock("len").nodes.len()
    }

    #[track_caller]
    pub fn is_empty(&self) -> bool {
        self.lock("is_empty").nodes.is_empty()
    }

    /// Current bucket count; always a power of two, at least `INITIAL_CAPACITY`.
    #[track_caller]
    pub fn capacity(&self) -> usize {
        self.lock("capacity").buckets.len()
    }

    /// Visit every entry, bucket by bucket, with the lock held.
    #[track_caller]
    pub fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(&K, &mut V),
    {
        let mut guard = self.lock("for_each");
        let t = &mut *guard.table;
        for index in 0..t.buckets.len() {
            let mut cur = t.buckets[index];
            while let Some(k) = cur {
                let node = &mut t.nodes[k];
                action(&node.key, &mut node.value);
                cur = node.next;
            }
        }
    }

    /// Release every value and return to the just-created state.
    #[track_caller]
    pub fn clear(&self) {
        let mut t = self.lock("clear");
        let released = t.nodes.len();
        t.reset(&*self.handler, "clear");
        log::debug!("cleared map, released {} entries", released);
    }

    /// Move every entry of `src` into `self`; on a shared key the value
    /// from `src` wins. `src` is left empty with no value destructor.
    #[track_caller]
    pub fn append(&self, src: &Self) {
        self.merge(src, "append", None::<fn(&mut V, V)>);
    }

    /// Like `append`, but a key present in both maps is reconciled by
    /// `on_conflict(dst_value, src_value)` instead of being overwritten.
    ///
    /// Every entry is in `self` before the first callback runs. If
    /// `on_conflict` panics, the `src` values it has not yet seen are dropped
    /// and their keys keep the value `self` already had.
    #[track_caller]
    pub fn append_with<F>(&self, src: &Self, on_conflict: F)
    where
        F: FnMut(&mut V, V),
    {
        self.merge(src, "append_with", Some(on_conflict));
    }

    #[track_caller]
    fn merge<F>(&self, src: &Self, op: &'static str, mut on_conflict: Option<F>)
    where
        F: FnMut(&mut V, V),
    {
        if core::ptr::eq(self, src) {
            return;
        }
        // Both locks are taken in address order so opposite-direction
        // merges of the same pair cannot deadlock.
        let (mut dst, mut from) = if (self as *const Self) < (src as *const Self) {
            let d = self.lock(op);
            let s = src.lock(op);
            (d, s)
        } else {
            let s = src.lock(op);
            let d = self.lock(op);
            (d, s)
        };

        from.destructor = None;
        let entries = from.take_entries(&*src.handler, op);
        let moved = entries.len();

        // Place every entry before any caller callback runs, so a panicking
        // destructor or conflict action leaves both maps consistent.
        let mut displaced = Vec::new();
        let mut conflicting = Vec::new();
        for (key, hash, value) in entries {
            match dst.locate(hash, &key, &*self.handler, op) {
                Ok(k) if on_conflict.is_some() => conflicting.push((k, value)),
                Ok(k) => {
                    let old = core::mem::replace(&mut dst.nodes[k].value, value);
                    displaced.push(old);
                }
                Err(index) => dst.link(index, key, hash, value),
            }
        }
        log::debug!(
            "{} moved {} entries ({} conflicting keys)",
            op,
            moved,
            displaced.len() + conflicting.len()
        );

        if let Some(f) = on_conflict.as_mut() {
            for (k, value) in conflicting {
                f(&mut dst.nodes[k].value, value);
            }
        }
        for value in displaced {
            dst.release(value);
        }
    }
}

impl<K: MapKey, V> Default for LockedHashMap<K, V> {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MapKey, V> Drop for LockedHashMap<K, V> {
    fn drop(&mut self) {
        let t = self.table.get_mut();
        let nodes = core::mem::take(&mut t.nodes);
        t.release_detached(nodes);
    }
}
