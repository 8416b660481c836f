//! Key hashing and the cached-hash policy of each key type.
//!
//! String keys hash with djb2 and keep the result in their entry so a
//! resize never walks the key bytes again. Integer keys are their own hash
//! and cache nothing; callers with clustered integer keys must mix them
//! before inserting.

/// Hash used to pick a bucket: `index = key_hash() & (capacity - 1)`.
///
/// Owned keys and their borrowed query forms must agree, e.g. `String`
/// and `str` hash to the same value.
pub trait KeyHash {
    fn key_hash(&self) -> u64;
}

/// An owned key type a `LockedHashMap` can store.
pub trait MapKey: KeyHash + Eq {
    /// What an entry keeps to avoid rehashing on resize.
    type Cached: Copy;

    fn cache(hash: u64) -> Self::Cached;

    /// Recover the bucket hash of a stored key.
    fn stored_hash(&self, cached: Self::Cached) -> u64;
}

/// djb2: seed 5381, multiplier 33, over every byte of `bytes`.
#[inline]
pub fn djb2(bytes: &[u8]) -> u64 {
    bytes.iter().fold(5381u64, |hash, &c| {
        (hash << 5).wrapping_add(hash).wrapping_add(u64::from(c))
    })
}

impl KeyHash for str {
    #[inline]
    fn key_hash(&self) -> u64 {
        djb2(self.as_bytes())
    }
}

impl KeyHash for String {
    #[inline]
    fn key_hash(&self) -> u64 {
        self.as_str().key_hash()
    }
}

impl KeyHash for u64 {
    #[inline]
    fn key_hash(&self) -> u64 {
        *self
    }
}

impl MapKey for String {
    type Cached = u64;

    #[inline]
    fn cache(hash: u64) -> u64 {
        hash
    }

    #[inline]
    fn stored_hash(&self, cached: u64) -> u64 {
        cached
    }
}

impl MapKey for u64 {
    type Cached = ();

    #[inline]
    fn cache(_hash: u64) {}

    #[inline]
    fn stored_hash(&self, _cached: ()) -> u64 {
        *self
    }
}

/// A key argument accepted by `LockedHashMap::insert`.
///
/// Owned keys are stored as they are. Borrowed forms are looked up through
/// `query` and copied with `into_key` only when a new entry is created.
pub trait InsertKey<K: MapKey> {
    type Query: ?Sized + KeyHash + Eq;

    fn query(&self) -> &Self::Query;

    fn into_key(self) -> K;
}

impl InsertKey<String> for String {
    type Query = str;

    #[inline]
    fn query(&self) -> &str {
        self
    }

    #[inline]
    fn into_key(self) -> String {
        self
    }
}

impl InsertKey<String> for &str {
    type Query = str;

    #[inline]
    fn query(&self) -> &str {
        self
    }

    #[inline]
    fn into_key(self) -> String {
        self.to_owned()
    }
}

impl InsertKey<String> for &String {
    type Query = str;

    #[inline]
    fn query(&self) -> &str {
        self.as_str()
    }

    #[inline]
    fn into_key(self) -> String {
        self.clone()
    }
}

impl InsertKey<u64> for u64 {
    type Query = u64;

    #[inline]
    fn query(&self) -> &u64 {
        self
    }

    #[inline]
    fn into_key(self) -> u64 {
        self
    }
}

impl InsertKey<u64> for &u64 {
    type Query = u64;

    #[inline]
    fn query(&self) -> &u64 {
        self
    }

    #[inline]
    fn into_key(self) -> u64 {
        *self
    }
}
