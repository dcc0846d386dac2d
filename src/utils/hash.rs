use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// The hash containers used across the crate. Aliased so the hashing
/// strategy can be swapped in one place.
pub type FastHashMap<K, V> = HashMap<K, V>;
pub type FastHashSet<K> = HashSet<K>;

pub fn hash64<T: Hash + ?Sized>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}
