//! C8 caches: a generic, frame-age-aware cache keyed by `Eq + Hash` descriptors, used for
//! pipelines, image views, framebuffers, and render passes. Entries that go unused for
//! [`RuntimeCreateInfo::cache_collection_threshold`](crate::device::RuntimeCreateInfo) frames
//! are collected on the next `collect` call.
//!
//! Vulkan create-info structs are not `Eq + Hash` themselves (they hold raw pointers and
//! `p_next` chains), so callers key the cache on an owned, hashable projection of the fields
//! that actually determine identity rather than the raw struct.
use crate::serial::FrameNumber;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

struct Entry<V> {
    value: V,
    last_used: FrameNumber,
}

pub struct ResourceCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    collection_threshold: u32,
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(collection_threshold: u32) -> ResourceCache<K, V> {
        ResourceCache {
            entries: Mutex::new(HashMap::new()),
            collection_threshold,
        }
    }

    /// Returns the cached value for `key`, creating it with `make` on a miss.
    pub fn get_or_insert_with(&self, key: K, now: FrameNumber, make: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = now;
            return entry.value.clone();
        }
        let value = make();
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                last_used: now,
            },
        );
        value
    }

    /// Returns the cached value for `key` without creating one on a miss.
    pub fn get(&self, key: &K, now: FrameNumber) -> Option<V>
    where
        V: Clone,
    {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(key)?;
        entry.last_used = now;
        Some(entry.value.clone())
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with), but `make` is fallible. A failed
    /// `make` leaves the cache untouched rather than poisoning it with a placeholder entry.
    pub fn get_or_try_insert_with<E>(&self, key: K, now: FrameNumber, make: impl FnOnce() -> Result<V, E>) -> Result<V, E>
    where
        V: Clone,
    {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&key) {
                entry.last_used = now;
                return Ok(entry.value.clone());
            }
        }
        let value = make()?;
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                last_used: now,
            },
        );
        Ok(value)
    }

    /// Drops every entry that has not been touched in `collection_threshold` frames, invoking
    /// `destroy` on each one so the caller can release the underlying Vulkan object.
    pub fn collect(&self, now: FrameNumber, mut destroy: impl FnMut(V)) {
        let mut entries = self.entries.lock().unwrap();
        let threshold = self.collection_threshold as u64;
        let stale: Vec<K> = entries
            .iter()
            .filter(|(_, e)| now.0.saturating_sub(e.last_used.0) > threshold)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(entry) = entries.remove(&key) {
                destroy(entry.value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_drops_only_entries_past_the_threshold() {
        let cache: ResourceCache<u32, u32> = ResourceCache::new(2);
        cache.get_or_insert_with(1, FrameNumber(0), || 100);
        cache.get_or_insert_with(2, FrameNumber(0), || 200);
        // touch key 1 again at frame 2, but never touch key 2 again
        cache.get_or_insert_with(1, FrameNumber(2), || 100);

        let mut destroyed = Vec::new();
        cache.collect(FrameNumber(3), |v| destroyed.push(v));
        assert_eq!(destroyed, vec![200]);
        assert_eq!(cache.len(), 1);
    }
}
