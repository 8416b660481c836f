//! LockedVec: growable vector behind a single mutex.

use crate::failure::{self, FatalHandler, Violation};
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use core::cmp::Ordering;
use core::ops::{Deref, DerefMut};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Slot count of a new vector.
pub const INITIAL_VEC_CAPACITY: usize = 10;

/// Callback receiving elements the vector releases (clear, drop).
pub type ElementDestructor<T> = Box<dyn FnMut(T) + Send>;

/// Identity comparison for `remove_by_value`: two handles are the same
/// element when they point at the same allocation, whatever its contents.
pub trait SameElement {
    fn same_element(&self, other: &Self) -> bool;
}

impl<U: ?Sized> SameElement for Arc<U> {
    #[inline]
    fn same_element(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<U: ?Sized> SameElement for &U {
    #[inline]
    fn same_element(&self, other: &Self) -> bool {
        core::ptr::eq(*self, *other)
    }
}

struct Slots<T> {
    items: Vec<T>,
    // Logical capacity; `items` always has at least this much room.
    capacity: usize,
    destructor: Option<ElementDestructor<T>>,
}

impl<T> Slots<T> {
    #[track_caller]
    fn reserve_to(&mut self, capacity: usize, handler: &dyn FatalHandler, op: &'static str) {
        let additional = capacity.saturating_sub(self.items.len());
        if self.items.try_reserve_exact(additional).is_err() {
            failure::die(
                handler,
                Violation::OutOfMemory {
                    op,
                    requested: capacity,
                },
            );
        }
        self.capacity = capacity;
    }

    #[track_caller]
    fn check_index(&self, index: usize, handler: &dyn FatalHandler, op: &'static str) {
        if index >= self.items.len() {
            failure::die(
                handler,
                Violation::OutOfBounds {
                    op,
                    index,
                    len: self.items.len(),
                },
            );
        }
    }

    fn release_all(&mut self) {
        let destructor = &mut self.destructor;
        for item in self.items.drain(..) {
            if let Some(d) = destructor.as_mut() {
                d(item);
            }
        }
    }
}

struct Locked<'a, T> {
    _reentrancy: ReentrancyGuard<'a>,
    slots: MutexGuard<'a, Slots<T>>,
}

impl<T> Deref for Locked<'_, T> {
    type Target = Slots<T>;
    fn deref(&self) -> &Slots<T> {
        &self.slots
    }
}

impl<T> DerefMut for Locked<'_, T> {
    fn deref_mut(&mut self) -> &mut Slots<T> {
        &mut self.slots
    }
}

/// A thread-safe growable vector.
///
/// Capacity starts at `INITIAL_VEC_CAPACITY` and doubles when full; only
/// `trim` shrinks it. Like `LockedHashMap`, every operation holds the one
/// mutex for its full duration and the lock is not reentrant.
pub struct LockedVec<T> {
    slots: Mutex<Slots<T>>,
    reentrancy: DebugReentrancy,
    handler: Arc<dyn FatalHandler>,
}

impl<T> LockedVec<T> {
    #[track_caller]
    pub fn new() -> Self {
        Self::with_parts(None, failure::default_handler())
    }

    #[track_caller]
    pub fn with_destructor<F>(destructor: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::with_parts(Some(Box::new(destructor)), failure::default_handler())
    }

    #[track_caller]
    pub fn with_handler(handler: Arc<dyn FatalHandler>) -> Self {
        Self::with_parts(None, handler)
    }

    #[track_caller]
    pub fn with_destructor_and_handler<F>(destructor: F, handler: Arc<dyn FatalHandler>) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::with_parts(Some(Box::new(destructor)), handler)
    }

    #[track_caller]
    fn with_parts(
        destructor: Option<ElementDestructor<T>>,
        handler: Arc<dyn FatalHandler>,
    ) -> Self {
        let mut slots = Slots {
            items: Vec::new(),
            capacity: 0,
            destructor,
        };
        slots.reserve_to(INITIAL_VEC_CAPACITY, &*handler, "create");
        Self {
            slots: Mutex::new(slots),
            reentrancy: DebugReentrancy::new(),
            handler,
        }
    }

    #[track_caller]
    fn lock(&self, op: &'static str) -> Locked<'_, T> {
        let entered = self.reentrancy.enter(op, &*self.handler);
        let slots = self.slots.lock();
        Locked {
            _reentrancy: entered.acquired(),
            slots,
        }
    }

    #[track_caller]
    pub fn set_destructor(&self, destructor: Option<ElementDestructor<T>>) {
        self.lock("set_destructor").destructor = destructor;
    }

    /// Append `item`, doubling the capacity first when full.
    #[track_caller]
    pub fn push(&self, item: T) {
        let mut s = self.lock("push");
        if s.items.len() == s.capacity {
            let doubled = s.capacity.max(1) * 2;
            s.reserve_to(doubled, &*self.handler, "push");
        }
        s.items.push(item);
    }

    /// A clone of the element at `index`; out of bounds is fatal.
    #[track_caller]
    pub fn get(&self, index: usize) -> T
    where
        T: Clone,
    {
        self.get_with(index, T::clone)
    }

    /// Run `f` on the element at `index` with the lock held.
    #[track_caller]
    pub fn get_with<R, F>(&self, index: usize, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let s = self.lock("get");
        s.check_index(index, &*self.handler, "get");
        f(&s.items[index])
    }

    /// Like `get`, but an out-of-bounds index is returned as an error
    /// instead of going to the die hook.
    #[track_caller]
    pub fn try_get(&self, index: usize) -> Result<T, Violation>
    where
        T: Clone,
    {
        let s = self.lock("try_get");
        s.items
            .get(index)
            .cloned()
            .ok_or_else(|| Violation::OutOfBounds {
                op: "try_get",
                index,
                len: s.items.len(),
            })
    }

    /// Remove the element at `index`, shifting later elements down. O(n),
    /// keeps order. The element is returned, not destroyed.
    #[track_caller]
    pub fn remove(&self, index: usize) -> T {
        let mut s = self.lock("remove");
        s.check_index(index, &*self.handler, "remove");
        s.items.remove(index)
    }

    /// Remove the element at `index`, moving the last element into its
    /// slot. O(1), does not keep order. The element is returned.
    #[track_caller]
    pub fn swap_remove(&self, index: usize) -> T {
        let mut s = self.lock("swap_remove");
        s.check_index(index, &*self.handler, "swap_remove");
        s.items.swap_remove(index)
    }

    /// Remove every element that is the same allocation as `value`,
    /// keeping the order of the rest. Returns how many were removed; they
    /// are dropped without the destructor.
    #[track_caller]
    pub fn remove_by_value(&self, value: &T) -> usize
    where
        T: SameElement,
    {
        let mut s = self.lock("remove_by_value");
        let before = s.items.len();
        s.items.retain(|item| !item.same_element(value));
        before - s.items.len()
    }

    /// Shrink the capacity to `len + 1`.
    #[track_caller]
    pub fn trim(&self) {
        let mut s = self.lock("trim");
        let target = s.items.len() + 1;
        s.items.shrink_to(target);
        s.capacity = target;
    }

    /// Release every element; the capacity is kept.
    #[track_caller]
    pub fn clear(&self) {
        self.lock("clear").release_all();
    }

    /// Unstable in-place sort.
    #[track_caller]
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.lock("sort_by").items.sort_unstable_by(compare);
    }

    #[track_caller]
    pub fn len(&self) -> usize {
        self.lock("len").items.len()
    }

    #[track_caller]
    pub fn is_empty(&self) -> bool {
        self.lock("is_empty").items.is_empty()
    }

    #[track_caller]
    pub fn capacity(&self) -> usize {
        self.lock("capacity").capacity
    }

    /// Clone the current contents in order.
    #[track_caller]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.lock("to_vec").items.clone()
    }
}

impl<T> Default for LockedVec<T> {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockedVec<T> {
    fn drop(&mut self) {
        self.slots.get_mut().release_all();
    }
}
