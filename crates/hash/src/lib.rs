//! In-memory extendible hash table: a directory of pointers to buckets that
//! doubles on overflow instead of rehashing the whole table.
//!
//! Unlike the paged structures in `storage`/`buffer`/`btree`, this index has
//! no on-disk layout — it exists purely as a secondary access structure over
//! data that lives elsewhere, so the whole thing is rebuilt from scratch
//! each time a process starts it.

use std::fmt::Display;
use std::sync::RwLock;

use xxhash_rust::xxh64::xxh64;

/// Buckets split once they would hold more than this many entries.
pub const MAX_BUCKET_SIZE: usize = 10;

struct Bucket<K, V> {
    local_depth: u32,
    entries: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            local_depth,
            entries: Vec::new(),
        }
    }
}

struct Directory<K, V> {
    global_depth: u32,
    /// `directory[slot]` is the index into `buckets` that slot points to.
    /// Multiple slots may point to the same bucket index.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// An in-memory extendible hash table over keys hashed by their `Display`
/// representation, so integer and string keys land in a comparable hash
/// space.
///
/// A single reader-writer lock guards the whole table: [`find`](Self::find)
/// takes a read lock, [`insert`](Self::insert) and [`remove`](Self::remove)
/// take a write lock.
pub struct ExtendibleHashTable<K, V> {
    inner: RwLock<Directory<K, V>>,
}

impl<K, V> Default for ExtendibleHashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExtendibleHashTable<K, V> {
    /// Creates a table with the initial two buckets (`hash = 0`, `hash = 1`)
    /// at `global_depth = 1`, each at `local_depth = 1`.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Directory {
                global_depth: 1,
                directory: vec![0, 1],
                buckets: vec![Bucket::new(1), Bucket::new(1)],
            }),
        }
    }

    /// Number of directory slots (`2^global_depth`).
    pub fn global_depth(&self) -> u32 {
        self.inner.read().expect("hash table lock poisoned").global_depth
    }

    /// Local depth of the bucket `directory[index]` points to.
    pub fn local_depth(&self, index: usize) -> u32 {
        let dir = self.inner.read().expect("hash table lock poisoned");
        let bucket_idx = dir.directory[index];
        dir.buckets[bucket_idx].local_depth
    }

    /// Count of distinct bucket identities in the directory — a bucket
    /// pointed to by multiple slots counts once.
    pub fn num_buckets(&self) -> usize {
        let dir = self.inner.read().expect("hash table lock poisoned");
        let mut seen: Vec<usize> = dir.directory.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Display + PartialEq + Clone,
    V: Clone,
{
    /// Returns every value stored under `key`.
    pub fn find(&self, key: &K) -> Vec<V> {
        let dir = self.inner.read().expect("hash table lock poisoned");
        let bucket = &dir.buckets[resolve(&dir, key)];
        bucket
            .entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Inserts `(key, value)`, splitting the target bucket (and doubling the
    /// directory first, if it is already at `global_depth`) when the bucket
    /// would overflow [`MAX_BUCKET_SIZE`].
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.inner.write().expect("hash table lock poisoned");
        let mut bucket_idx = resolve(&dir, &key);

        if dir.buckets[bucket_idx].entries.len() + 1 > MAX_BUCKET_SIZE {
            split_bucket(&mut dir, bucket_idx);
            bucket_idx = resolve(&dir, &key);
        }

        dir.buckets[bucket_idx].entries.push((key, value));
    }

    /// Removes the first entry matching `key`, returning whether one was
    /// found.
    pub fn remove(&self, key: &K) -> bool {
        let mut dir = self.inner.write().expect("hash table lock poisoned");
        let bucket_idx = resolve(&dir, key);
        let entries = &mut dir.buckets[bucket_idx].entries;
        if let Some(pos) = entries.iter().position(|(k, _)| k == key) {
            entries.remove(pos);
            true
        } else {
            false
        }
    }
}

fn hash<K: Display>(key: &K, depth: u32) -> u64 {
    let digest = xxh64(key.to_string().as_bytes(), 0);
    digest & ((1u64 << depth) - 1)
}

fn resolve<K: Display, V>(dir: &Directory<K, V>, key: &K) -> usize {
    let slot = hash(key, dir.global_depth) as usize;
    dir.directory[slot]
}

/// Splits the bucket at `bucket_idx`, doubling the directory first if the
/// bucket is already at `global_depth`, then redistributes its entries
/// across the two halves at `local_depth + 1`.
fn split_bucket<K, V>(dir: &mut Directory<K, V>, bucket_idx: usize)
where
    K: Display + Clone,
{
    let local_depth = dir.buckets[bucket_idx].local_depth;

    if local_depth == dir.global_depth {
        // `hash(key, depth)` takes the low `depth` bits of the digest, so
        // growing the depth by one adds a new *high* bit: slot `i` at the
        // old depth becomes slot `i` or `i + old_size` at the new depth,
        // both still resolving to the bucket `i` used to point to. A plain
        // concatenation of the directory with itself realizes exactly that.
        let old_len = dir.directory.len();
        let mut doubled = dir.directory.clone();
        doubled.extend_from_slice(&dir.directory);
        debug_assert_eq!(doubled.len(), old_len * 2);
        dir.directory = doubled;
        dir.global_depth += 1;
    }

    let new_local_depth = local_depth + 1;
    let new_bucket_idx = dir.buckets.len();
    dir.buckets.push(Bucket::new(new_local_depth));
    dir.buckets[bucket_idx].local_depth = new_local_depth;

    // Every directory slot that used to point at `bucket_idx` now splits:
    // slots whose new high bit (bit `local_depth`, 0-indexed) is 1 move to
    // the new bucket; the rest stay.
    let high_bit = 1usize << local_depth;
    for slot in 0..dir.directory.len() {
        if dir.directory[slot] == bucket_idx && (slot & high_bit) != 0 {
            dir.directory[slot] = new_bucket_idx;
        }
    }

    let entries = std::mem::take(&mut dir.buckets[bucket_idx].entries);
    for (key, value) in entries {
        let target = resolve(dir, &key);
        dir.buckets[target].entries.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_table_has_two_buckets_at_depth_one() {
        let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new();
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);
        assert_eq!(table.local_depth(0), 1);
        assert_eq!(table.local_depth(1), 1);
    }

    #[test]
    fn insert_and_find_round_trips() {
        let table = ExtendibleHashTable::new();
        table.insert(10i64, "ten");
        assert_eq!(table.find(&10), vec!["ten"]);
        assert!(table.find(&11).is_empty());
    }

    #[test]
    fn find_returns_every_matching_value_for_duplicate_keys() {
        let table = ExtendibleHashTable::new();
        table.insert(10i64, "a");
        table.insert(10i64, "b");
        let mut found = table.find(&10);
        found.sort_unstable();
        assert_eq!(found, vec!["a", "b"]);
    }

    #[test]
    fn remove_drops_first_match_only() {
        let table = ExtendibleHashTable::new();
        table.insert(10i64, "a");
        table.insert(10i64, "b");
        assert!(table.remove(&10));
        assert_eq!(table.find(&10).len(), 1);
        assert!(table.remove(&10));
        assert!(table.find(&10).is_empty());
        assert!(!table.remove(&10));
    }

    #[test]
    fn overflowing_a_bucket_splits_and_grows_the_directory() {
        let table = ExtendibleHashTable::new();
        for i in 0..500i64 {
            table.insert(i, i);
        }
        for i in 0..500i64 {
            assert_eq!(table.find(&i), vec![i], "key {i}");
        }
        assert!(table.global_depth() >= 1);
        assert!(table.num_buckets() >= 2);

        let mut slots_by_bucket: std::collections::HashMap<usize, u32> =
            std::collections::HashMap::new();
        for slot in 0..(1usize << table.global_depth()) {
            slots_by_bucket.insert(slot, table.local_depth(slot));
        }
        for local_depth in slots_by_bucket.values() {
            assert!(*local_depth <= table.global_depth());
        }
    }

    #[test]
    fn string_and_integer_keys_hash_through_the_same_stringify_path() {
        let int_table = ExtendibleHashTable::new();
        int_table.insert(7i64, "int-seven");
        assert_eq!(int_table.find(&7), vec!["int-seven"]);

        let string_table = ExtendibleHashTable::new();
        string_table.insert("7".to_string(), "string-seven");
        assert_eq!(string_table.find(&"7".to_string()), vec!["string-seven"]);
    }

    #[test]
    fn num_buckets_counts_distinct_buckets_not_directory_slots() {
        let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new();
        // Freshly created: 2 directory slots, 2 distinct buckets.
        assert_eq!(table.num_buckets(), 2);
    }
}
