//! In-memory copy of the persisted entries

use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Concurrent key/value mirror with an entry counter
///
/// The counter only changes where an entry is inserted for the first time or removed,
/// so it equals the number of keys once every in-flight call has returned.
#[derive(Debug, Default)]
pub struct Mirror {
    entries: DashMap<String, Vec<u8>>,
    count: AtomicIsize,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mirror from persisted rows
    pub fn load<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mirror = Self::new();
        for (key, value) in rows {
            mirror.upsert(key, value);
        }
        mirror
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Copy of the bytes stored under `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store `value`, returning true when `key` was not present before
    pub fn upsert(&self, key: String, value: Vec<u8>) -> bool {
        let inserted = self.entries.insert(key, value).is_none();
        if inserted {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
        inserted
    }

    /// Remove `key`, returning true when it was present
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn len(&self) -> usize {
        // an insert and a removal of the same key can race between map and counter
        self.count.load(Ordering::SeqCst).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry at the time of the call
    pub fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Value of a pseudo-randomly chosen entry
    ///
    /// Concurrent removals may shrink the map below the sampled index during the scan,
    /// in which case the first visited entry is returned instead.
    pub fn random(&self) -> Option<Vec<u8>> {
        let count = self.len();
        if count == 0 {
            return None;
        }

        let mut index = rand::thread_rng().gen_range(0..count);
        let mut fallback = None;

        for entry in self.entries.iter() {
            if fallback.is_none() {
                fallback = Some(entry.value().clone());
            }

            if index == 0 {
                return Some(entry.value().clone());
            }
            index -= 1;
        }

        fallback
    }
}
