//! Debug-only detection of same-thread re-entry into a locked container.
//!
//! Every container lock is non-reentrant: a `for_each` action, a value
//! destructor or a conflict action that calls back into the same
//! container would block forever on its own lock. In debug builds the
//! tracker remembers which thread holds the lock, and a second entry from
//! that thread reports `Violation::Reentrant` through the die hook instead.
//! In release builds this compiles to a zero-cost no-op and the deadlock
//! contract applies.

use crate::failure::FatalHandler;
#[cfg(debug_assertions)]
use crate::failure::{self, Violation};
#[cfg(not(debug_assertions))]
use core::marker::PhantomData;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
fn current_thread_token() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    std::thread_local! {
        static TOKEN: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}

/// Per-instance lock-owner tracker. Embed next to the container mutex and
/// guard public entry-points with `self.reentrancy.enter(op, handler)`
/// before locking, then `acquired()` on the guard once the lock is held.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    holder: AtomicUsize,
}

impl DebugReentrancy {
    /// Const so it can be a field default.
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            holder: AtomicUsize::new(0),
        }
    }

    /// Check that the current thread does not already hold the lock.
    #[inline]
    #[track_caller]
    pub fn enter(&self, op: &'static str, handler: &dyn FatalHandler) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let me = current_thread_token();
            if self.holder.load(Ordering::Acquire) == me {
                failure::die(handler, Violation::Reentrant { op });
            }
            ReentrancyGuard {
                owner: self,
                me,
                armed: false,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = (op, handler);
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(debug_assertions)]
    me: usize,
    #[cfg(debug_assertions)]
    armed: bool,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl ReentrancyGuard<'_> {
    /// Record the current thread as lock holder. Call only with the lock held.
    #[inline]
    #[cfg_attr(not(debug_assertions), allow(unused_mut))]
    pub fn acquired(mut self) -> Self {
        #[cfg(debug_assertions)]
        {
            self.owner.holder.store(self.me, Ordering::Release);
            self.armed = true;
        }
        self
    }
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if self.armed {
            self.owner.holder.store(0, Ordering::Release);
        }
    }
}
