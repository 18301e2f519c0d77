//! HTTP-transaction accumulator: collapses multiple HTTP protocol records
//! for the same key into one `{sum, max}` pair before the flow record
//! arrives (spec.md §3, §4.2 step 4, testable property 3).

use std::collections::HashMap;

use ids_core::FlowKey;

#[derive(Debug, Clone, Default)]
pub struct HttpAccumulatorEntry {
    pub sum_response_body_len: i64,
    pub max_trans_depth: i64,
    pub last_method: String,
}

#[derive(Default)]
pub struct HttpAccumulator {
    entries: HashMap<FlowKey, HttpAccumulatorEntry>,
}

impl HttpAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, key: FlowKey, trans_depth: i64, response_body_len: i64, method: &str) {
        let entry = self.entries.entry(key).or_default();
        entry.sum_response_body_len += response_body_len;
        entry.max_trans_depth = entry.max_trans_depth.max(trans_depth);
        entry.last_method = method.to_string();
    }

    /// Removes and returns the accumulator entry for `key`, if any (entries
    /// are consumed exactly once by the arriving flow record).
    pub fn take(&mut self, key: &FlowKey) -> Option<HttpAccumulatorEntry> {
        self.entries.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_sum_and_max() {
        let mut acc = HttpAccumulator::new();
        let key = FlowKey::new("tcp", "10.0.0.1", 1234, "10.0.0.2", 80);
        acc.accumulate(key.clone(), 1, 100, "GET");
        acc.accumulate(key.clone(), 2, 250, "GET");
        acc.accumulate(key.clone(), 2, 50, "GET");
        let entry = acc.take(&key).unwrap();
        assert_eq!(entry.sum_response_body_len, 400);
        assert_eq!(entry.max_trans_depth, 2);
        assert_eq!(entry.last_method, "GET");
        assert!(acc.take(&key).is_none());
    }
}
