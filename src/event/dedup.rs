//! Bounded recent-id cache for event deduplication.
//!
//! The trigger source delivers at-least-once; redelivered ids within the
//! retention window must not produce a second run.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory dedup cache keyed by event id.
///
/// Bounded by `max_entries` (oldest-first eviction) and by a TTL so an id
/// seen long ago can be processed again. The check-then-act path holds one
/// lock, so concurrent deliveries of the same id admit exactly one.
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Check if the event id is new. Returns true if new (process it),
    /// false if a duplicate (skip it). Records the id if new.
    pub fn check_and_record(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        // Existing non-expired entry means duplicate
        if let Some(&recorded_at) = entries.get(id) {
            if now.duration_since(recorded_at) < self.ttl {
                return false;
            }
        }

        // Drop expired entries first
        entries.retain(|_, &mut recorded_at| now.duration_since(recorded_at) < self.ttl);

        // Evict oldest if at capacity
        if entries.len() >= self.max_entries {
            if let Some(oldest_id) = entries
                .iter()
                .min_by_key(|(_, t)| *t)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_id);
            }
        }

        entries.insert(id.to_string(), now);
        true
    }

    /// Number of tracked ids (for testing/metrics).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
