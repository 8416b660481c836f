//! locked-containers: a chained hash map and a growable vector, each
//! guarded by one mutex, for sharing across native threads.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: simple, obviously-correct shared containers. One lock per
//!   instance, held for the full duration of every operation.
//! - Pieces:
//!   - LockedHashMap<K, V>: separate chaining over a power-of-two bucket
//!     array; `StrMap<V>` (djb2-hashed `String` keys) and `U64Map<V>`
//!     (identity-hashed `u64` keys) are the two key variants.
//!   - LockedVec<T>: growable vector with explicit capacity doubling,
//!     order-preserving and swap removal, trim, and sort.
//!   - failure: the die hook receiving broken caller contracts.
//!
//! Constraints
//! - Coarse locking: no striping, no reader/writer split. Reads take the
//!   same exclusive lock as writes, so a resize is never observable.
//! - Non-reentrant: a `for_each` action, a destructor or a conflict action
//!   must not call back into the same container. Debug builds report this
//!   through the die hook; release builds deadlock.
//! - No recoverable errors: missing keys are `None`/`false`, duplicate keys
//!   overwrite. Out-of-bounds indices, allocation failure and re-entry go
//!   to the container's `FatalHandler`, which never returns.
//!
//! Storage
//! - Map entries live in a `SlotMap` arena; each bucket holds the arena key
//!   of its chain head and each entry the key of its successor. Resizing
//!   relinks arena keys only, no entry moves.
//! - String entries cache their djb2 hash so a resize never rehashes key
//!   bytes. Integer keys are their own hash and cache nothing; callers with
//!   clustered integer keys should mix them first.
//! - The map grows to twice its bucket count before an insert would push
//!   `len / capacity` above 0.7, and `clear` returns it to 16 buckets.
//!
//! Ownership
//! - Containers own their values. An optional destructor receives each
//!   value the container releases (overwrite, remove, clear, drop); without
//!   one the value is dropped. `LockedHashMap::take`, `LockedVec::remove`
//!   and `LockedVec::swap_remove` hand the value back instead.
//! - `append`/`append_with` move every entry of the source map and disable
//!   its destructor. Both locks are taken in address order, so merging a
//!   pair of maps in opposite directions from two threads cannot deadlock.

pub mod failure;
pub mod key;
mod locked_hash_map;
mod locked_hash_map_proptest;
mod locked_vec;
mod reentrancy;

// Public surface
pub use failure::{FatalHandler, Terminate, Unwind, Violation};
pub use key::{InsertKey, KeyHash, MapKey};
pub use locked_hash_map::{
    Destructor, LockedHashMap, StrMap, U64Map, INITIAL_CAPACITY, LOAD_FACTOR,
};
pub use locked_vec::{ElementDestructor, LockedVec, SameElement, INITIAL_VEC_CAPACITY};
pub use reentrancy::{DebugReentrancy, ReentrancyGuard};
