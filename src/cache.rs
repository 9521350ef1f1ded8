//! A fixed-size LRU object cache.
//!
//! Objects are stored keyed by logical address in a bucketed hash table
//! (bucket chains kept in ascending address order) threaded onto a doubly
//! linked recency list. Insertions beyond the configured maximum size evict
//! from the oldest end.
//!
//! The cache is a bounded, replaceable fast path. It deliberately overlaps
//! the read set in intent but stays distinct from it: the read set is
//! authoritative and unbounded for the lifetime of a session, while entries
//! here may vanish at any moment.

use crate::object::ObjectRef;
use crate::{LogicalAddress, DEFAULT_CACHE_BUCKETS};

/// Default capacity, paired with [`DEFAULT_CACHE_BUCKETS`].
pub const DEFAULT_CACHE_SIZE: usize = 1024;

struct Entry {
    object: ObjectRef,
    address: LogicalAddress,
    older: Option<usize>,
    younger: Option<usize>,
}

/// Bounded object cache keyed by logical address.
pub struct Cache {
    buckets: Vec<Vec<usize>>,
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    oldest: Option<usize>,
    youngest: Option<usize>,
    size: usize,
    max_size: usize,
}

impl Cache {
    pub fn new(bucket_count: usize, max_size: usize) -> Cache {
        Cache {
            buckets: (0..bucket_count.max(1)).map(|_| Vec::new()).collect(),
            entries: Vec::new(),
            free: Vec::new(),
            oldest: None,
            youngest: None,
            size: 0,
            max_size: max_size.max(1),
        }
    }

    pub fn with_defaults() -> Cache {
        Cache::new(DEFAULT_CACHE_BUCKETS, DEFAULT_CACHE_SIZE)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Logical address of the least recently used entry.
    pub fn oldest_address(&self) -> Option<LogicalAddress> {
        self.oldest.map(|i| self.entry(i).address)
    }

    /// Logical address of the most recently used entry.
    pub fn youngest_address(&self) -> Option<LogicalAddress> {
        self.youngest.map(|i| self.entry(i).address)
    }

    /// Add an object under its logical address, evicting from the oldest end
    /// if the cache runs past its maximum size.
    pub fn insert(&mut self, object: ObjectRef) {
        let address = object.logical();
        let slot = self.allocate(Entry {
            object,
            address,
            older: None,
            younger: None,
        });

        let bucket = self.bucket_for(address);
        // Chains stay sorted by address; equal addresses append after their
        // predecessors.
        let at = self.buckets[bucket].partition_point(|&i| self.entry(i).address <= address);
        self.buckets[bucket].insert(at, slot);

        self.make_youngest(slot);
        self.size += 1;

        while self.size > self.max_size {
            let oldest = self.oldest.expect("nonempty cache has an oldest entry");
            self.remove_slot(oldest);
        }
    }

    /// Look up an address and promote the hit to most recently used.
    pub fn get(&mut self, address: LogicalAddress) -> Option<ObjectRef> {
        let slot = self.find(address)?;
        self.unlink_age(slot);
        self.make_youngest(slot);
        Some(self.entry(slot).object.clone())
    }

    /// Look up an address without touching the recency list.
    pub fn get_quiet(&self, address: LogicalAddress) -> Option<ObjectRef> {
        self.find(address).map(|slot| self.entry(slot).object.clone())
    }

    /// Drop an object from the cache. Misses are a no-op.
    pub fn remove(&mut self, object: &ObjectRef) {
        self.remove_at(object.logical());
    }

    /// Drop whatever entry holds `address`. Misses are a no-op.
    pub fn remove_at(&mut self, address: LogicalAddress) {
        if let Some(slot) = self.find(address) {
            self.remove_slot(slot);
        }
    }

    fn bucket_for(&self, address: LogicalAddress) -> usize {
        address as usize % self.buckets.len()
    }

    fn entry(&self, slot: usize) -> &Entry {
        self.entries[slot].as_ref().expect("live cache slot")
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry {
        self.entries[slot].as_mut().expect("live cache slot")
    }

    fn allocate(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    fn find(&self, address: LogicalAddress) -> Option<usize> {
        let bucket = &self.buckets[self.bucket_for(address)];
        bucket
            .iter()
            .copied()
            .find(|&slot| self.entry(slot).address == address)
    }

    fn remove_slot(&mut self, slot: usize) {
        let address = self.entry(slot).address;
        let bucket = self.bucket_for(address);
        self.buckets[bucket].retain(|&i| i != slot);

        self.unlink_age(slot);
        self.entries[slot] = None;
        self.free.push(slot);
        self.size -= 1;
    }

    fn unlink_age(&mut self, slot: usize) {
        let (older, younger) = {
            let e = self.entry(slot);
            (e.older, e.younger)
        };

        if self.youngest == Some(slot) {
            self.youngest = older;
        }
        if self.oldest == Some(slot) {
            self.oldest = younger;
        }
        if let Some(older) = older {
            self.entry_mut(older).younger = younger;
        }
        if let Some(younger) = younger {
            self.entry_mut(younger).older = older;
        }

        let e = self.entry_mut(slot);
        e.older = None;
        e.younger = None;
    }

    fn make_youngest(&mut self, slot: usize) {
        self.entry_mut(slot).older = self.youngest;
        self.entry_mut(slot).younger = None;

        if let Some(previous) = self.youngest {
            self.entry_mut(previous).younger = Some(slot);
        }
        self.youngest = Some(slot);

        if self.oldest.is_none() {
            self.oldest = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    fn integer_at(la: u32) -> ObjectRef {
        let o = Object::integer(la as i32);
        o.set_logical(la);
        o
    }

    fn bucket_addresses(cache: &Cache, bucket: usize) -> Vec<u32> {
        cache.buckets[bucket]
            .iter()
            .map(|&slot| cache.entry(slot).address)
            .collect()
    }

    #[test]
    fn get_hits_and_misses() {
        let mut cache = Cache::new(10, 100);
        cache.insert(integer_at(42));

        let hit = cache.get(42).unwrap();
        assert_eq!(hit.integer_value(), 42);
        assert!(cache.get(43).is_none());
    }

    #[test]
    fn overfill_evicts_least_recently_used() {
        let mut cache = Cache::new(30, 100);
        for la in 100..200 {
            cache.insert(integer_at(la));
        }
        assert_eq!(cache.len(), 100);

        cache.insert(integer_at(200));
        assert_eq!(cache.len(), 100);
        assert!(cache.get_quiet(100).is_none());
        assert_eq!(cache.youngest_address(), Some(200));
        assert_eq!(cache.oldest_address(), Some(101));
    }

    #[test]
    fn mid_bucket_insert_keeps_chain_sorted() {
        let mut cache = Cache::new(10, 100);
        cache.insert(integer_at(42));
        cache.insert(integer_at(12));
        cache.insert(integer_at(32));

        assert_eq!(bucket_addresses(&cache, 2), vec![12, 32, 42]);
    }

    #[test]
    fn get_promotes_but_get_quiet_does_not() {
        let mut cache = Cache::new(10, 100);
        cache.insert(integer_at(1));
        cache.insert(integer_at(2));
        cache.insert(integer_at(3));

        assert_eq!(cache.oldest_address(), Some(1));
        assert_eq!(cache.youngest_address(), Some(3));

        cache.get_quiet(1).unwrap();
        assert_eq!(cache.oldest_address(), Some(1));
        assert_eq!(cache.youngest_address(), Some(3));

        cache.get(1).unwrap();
        assert_eq!(cache.oldest_address(), Some(2));
        assert_eq!(cache.youngest_address(), Some(1));
    }

    #[test]
    fn remove_unlinks_everywhere() {
        let mut cache = Cache::new(10, 100);
        cache.insert(integer_at(5));
        cache.insert(integer_at(15));
        cache.insert(integer_at(25));

        cache.remove_at(15);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_quiet(15).is_none());
        assert_eq!(bucket_addresses(&cache, 5), vec![5, 25]);
        assert_eq!(cache.oldest_address(), Some(5));
        assert_eq!(cache.youngest_address(), Some(25));

        // Removing something absent is a no-op.
        cache.remove_at(15);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn recency_survives_eviction_churn() {
        let mut cache = Cache::new(7, 4);
        for la in 1..=4 {
            cache.insert(integer_at(la));
        }
        cache.get(1);
        cache.insert(integer_at(5));

        // 2 was the least recently used once 1 was promoted.
        assert!(cache.get_quiet(2).is_none());
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.oldest_address(), Some(3));
        assert_eq!(cache.youngest_address(), Some(5));
    }
}
