//! Recent load failures per collection
//!
//! Show paths consult this when a collection has no load record, so users see
//! why the last load failed instead of a bare "not loaded".

use crate::common::{Error, ErrorCode, UniqueId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    errors: HashMap<ErrorCode, (usize, Error)>,
    last_update: Instant,
}

/// Bounded, TTL-expired map of collection to load failures.
pub struct FailedLoadCache {
    entries: Mutex<HashMap<UniqueId, Entry>>,
    ttl: Duration,
    capacity: usize,
}

impl FailedLoadCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn put(&self, collection: UniqueId, err: &Error) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&collection) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_update)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        let entry = entries.entry(collection).or_insert_with(|| Entry {
            errors: HashMap::new(),
            last_update: Instant::now(),
        });
        let slot = entry
            .errors
            .entry(err.code())
            .or_insert_with(|| (0, err.clone()));
        slot.0 += 1;
        slot.1 = err.clone();
        entry.last_update = Instant::now();
    }

    /// The most frequent recent failure of the collection.
    pub fn get(&self, collection: UniqueId) -> Option<Error> {
        let entries = self.entries.lock();
        let entry = entries.get(&collection)?;
        if entry.last_update.elapsed() > self.ttl {
            return None;
        }
        entry
            .errors
            .values()
            .max_by_key(|(count, _)| *count)
            .map(|(_, err)| err.clone())
    }

    pub fn remove(&self, collection: UniqueId) {
        self.entries.lock().remove(&collection);
    }

    /// Sweep expired entries.
    pub fn try_expire(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| entry.last_update.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
