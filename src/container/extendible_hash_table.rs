use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// Concurrent dictionary that grows by directory doubling and bucket
/// splitting. Used as the buffer pool's page table and for other small
/// in-memory indexes.
///
/// The directory is a vector of indices into a bucket arena; all slots
/// sharing the low `local_depth` bits of the hash refer to the same bucket.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    global_depth: u32,
    bucket_size: usize,
    num_buckets: usize,
    /// dir[i] is an index into `buckets`
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, bucket_size: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(bucket_size),
        }
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(Inner {
                global_depth: 0,
                bucket_size,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.dir[inner.dir_index(key)]];
        bucket.items.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket_idx = inner.dir[inner.dir_index(key)];
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Insert or overwrite. Splits overfull buckets (doubling the directory
    /// when needed) until the pair fits; the whole operation, retries
    /// included, runs under one critical section so no concurrent insert can
    /// interleave with a half-finished split.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let bucket_idx = inner.dir[inner.dir_index(&key)];
            let bucket_size = inner.bucket_size;
            let bucket = &mut inner.buckets[bucket_idx];

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if bucket.items.len() < bucket_size {
                bucket.items.push((key, value));
                return;
            }
            inner.split(bucket_idx);
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn dir_index(&self, key: &K) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (hash_of(key) & mask) as usize
    }

    /// Split the bucket stored at arena slot `bucket_idx`. Every existing
    /// pair is redistributed by the new high bit, so nothing is lost.
    fn split(&mut self, bucket_idx: usize) {
        let local_depth = self.buckets[bucket_idx].local_depth;

        // Directory is at capacity for this bucket: double it first.
        if local_depth == self.global_depth {
            let old_len = self.dir.len();
            self.dir.extend_from_within(0..old_len);
            self.global_depth += 1;
        }

        let high_bit = 1u64 << local_depth;
        let mut bucket_zero = Bucket::new(local_depth + 1, self.bucket_size);
        let mut bucket_one = Bucket::new(local_depth + 1, self.bucket_size);

        for (k, v) in self.buckets[bucket_idx].items.drain(..) {
            if hash_of(&k) & high_bit != 0 {
                bucket_one.items.push((k, v));
            } else {
                bucket_zero.items.push((k, v));
            }
        }

        // The zero bucket reuses the old arena slot; the one bucket gets a
        // fresh slot. Rewrite every directory entry that pointed at the old
        // bucket according to its high bit.
        let one_idx = self.buckets.len();
        self.buckets[bucket_idx] = bucket_zero;
        self.buckets.push(bucket_one);
        self.num_buckets += 1;

        for (i, slot) in self.dir.iter_mut().enumerate() {
            if *slot == bucket_idx && (i as u64) & high_bit != 0 {
                *slot = one_idx;
            }
        }
    }
}
