//! Bounded flow/protocol caches awaiting a correlation partner, and the
//! lost-record dump they feed (spec.md §3, §4.5).

use std::collections::VecDeque;

use ids_core::FlowKey;

/// One awaiting record, with the raw line it arrived on kept alongside for
/// the lost-record dump.
#[derive(Debug, Clone)]
pub struct CacheEntry<R> {
    pub key: FlowKey,
    pub record: R,
    pub raw_line: String,
    pub inserted_at: i64,
}

/// A capacity-bounded FIFO keyed by [`FlowKey`] equality, oldest evicted on
/// overflow, with an optional time window (REDESIGN FLAG R6).
pub struct BoundedCache<R> {
    capacity: usize,
    max_age_secs: Option<u64>,
    entries: VecDeque<CacheEntry<R>>,
}

impl<R> BoundedCache<R> {
    pub fn new(capacity: usize, max_age_secs: Option<u64>) -> Self {
        BoundedCache {
            capacity: capacity.max(1),
            max_age_secs,
            entries: VecDeque::new(),
        }
    }

    /// Inserts an entry, evicting the oldest if at capacity. Returns the
    /// evicted entry, if any.
    pub fn push(&mut self, key: FlowKey, record: R, raw_line: String, now: i64) -> Option<CacheEntry<R>> {
        self.expire(now);
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(CacheEntry {
            key,
            record,
            raw_line,
            inserted_at: now,
        });
        evicted
    }

    /// Removes and returns the oldest entry matching `key`, if any
    /// (tie-breaking rule: oldest-inserted wins).
    pub fn take_matching(&mut self, key: &FlowKey, now: i64) -> Option<CacheEntry<R>> {
        self.expire(now);
        let idx = self.entries.iter().position(|e| &e.key == key)?;
        self.entries.remove(idx)
    }

    /// Looks up the oldest entry matching `key` without removing it (FTP
    /// protocol records may be reused for additional commands before the
    /// flow record arrives).
    pub fn peek_matching(&mut self, key: &FlowKey, now: i64) -> Option<&CacheEntry<R>> {
        self.expire(now);
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw lines of every entry currently cached, oldest first, for the
    /// lost-record dump.
    pub fn raw_lines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.raw_line.as_str())
    }

    fn expire(&mut self, now: i64) {
        let Some(max_age) = self.max_age_secs else {
            return;
        };
        let max_age = max_age as i64;
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.inserted_at) > max_age {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}
