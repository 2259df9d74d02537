//! Convenience collection type aliases, with a pluggable hasher.
//!
//! The default hasher is swapped for a non-cryptographic one
//! (`twox-hash`) via the `collections_randomstate_twox_hash` feature,
//! since none of the keys used throughout the crate (node ids, sequence
//! numbers, digests) need protection against hash-flooding from an
//! already-Byzantine-tolerant peer set.

use std::collections::HashSet as StdHashSet;

#[cfg(feature = "collections_randomstate_twox_hash")]
type RandomState = std::hash::BuildHasherDefault<twox_hash::XxHash64>;

#[cfg(feature = "collections_randomstate_std")]
type RandomState = std::collections::hash_map::RandomState;

/// A `HashMap` using the crate's configured hasher.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet` using the crate's configured hasher.
pub type HashSet<K> = StdHashSet<K, RandomState>;

/// An insertion-ordered map, used to keep client requests in FIFO
/// order while still allowing O(1) lookup by digest.
pub type OrderedMap<K, V> = linked_hash_map::LinkedHashMap<K, V>;

/// Returns a new, empty `HashMap`.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}

/// Returns a new, empty `HashMap` with the given initial capacity.
pub fn hash_map_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, Default::default())
}

/// Returns a new, empty `HashSet`.
pub fn hash_set<K>() -> HashSet<K> {
    HashSet::default()
}

/// Returns a new, empty `OrderedMap`.
pub fn ordered_map<K, V>() -> OrderedMap<K, V> {
    OrderedMap::new()
}
