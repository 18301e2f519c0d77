//! HTTP-method and FTP-command counters, keyed by `(saddr, sport, daddr,
//! dport, VALUE_UPPERCASE)` and incremented once per matching protocol
//! record seen (spec.md §3). Unbounded in the original system; bounded
//! here via LRU (REDESIGN FLAG R4, spec.md §9 open question).

use std::num::NonZeroUsize;

use lru::LruCache;

pub struct KeyedCounters {
    map: LruCache<String, i64>,
}

impl KeyedCounters {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        KeyedCounters {
            map: LruCache::new(capacity),
        }
    }

    pub fn key(saddr: &str, sport: u32, daddr: &str, dport: u32, value: &str) -> String {
        format!("{saddr}:{sport}:{daddr}:{dport}:{}", value.to_ascii_uppercase())
    }

    /// Increments the counter for `key` and returns the new value.
    pub fn increment(&mut self, key: &str) -> i64 {
        let next = self.map.get(key).copied().unwrap_or(0) + 1;
        self.map.put(key.to_string(), next);
        next
    }

    /// Reads the current value for `key` without mutating recency order
    /// beyond a normal LRU touch.
    pub fn get(&mut self, key: &str) -> i64 {
        self.map.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_independently_per_key() {
        let mut c = KeyedCounters::new(16);
        let k = KeyedCounters::key("10.0.0.1", 5000, "10.0.0.9", 21, "user");
        assert_eq!(c.increment(&k), 1);
        assert_eq!(c.increment(&k), 2);
        assert_eq!(c.get(&k), 2);
        let other = KeyedCounters::key("10.0.0.1", 5000, "10.0.0.9", 21, "retr");
        assert_eq!(c.get(&other), 0);
    }
}
