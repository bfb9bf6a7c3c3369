//! Streaming Accumulator - merges partial-field fragments per entity
//!
//! Some fields arrive as a sequence of fragments (a log message streamed
//! token by token) before a terminal delivery carries the complete value.
//! The accumulator keeps one buffer per entity while it is mid-stream and
//! returns the cumulative value after every fragment, so observers never see
//! a shorter value than they were last shown.
//!
//! Fragments are concatenated in arrival order. Nothing here reorders or
//! deduplicates them; a transport that can reorder needs a sequence number
//! upstream.
//!
//! Buffers are bounded by an [`EvictionPolicy`]. The TTL slides from the last
//! touch, so touch order is also expiry order and a single BTreeMap keyed by
//! touch sequence serves both the LRU and the expiry sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::clock::Clock;
use super::eviction::{EvictionPolicy, EvictionReason};
use crate::store::FieldMap;
use crate::types::EntityKey;

#[derive(Debug, Clone)]
struct BufferEntry {
    partial_fields: FieldMap,
    expires_at: u64,
    touch_seq: u64,
    fragments: u32,
}

/// Accumulator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccumulatorStats {
    pub open_buffers: usize,
    pub fragments: u64,
    pub closed: u64,
    pub capacity_evictions: u64,
    pub ttl_evictions: u64,
}

/// Bounded per-entity buffer of in-flight streaming fields
pub struct StreamingAccumulator {
    entries: HashMap<EntityKey, BufferEntry>,
    /// touch sequence -> key, oldest first
    touch_index: BTreeMap<u64, EntityKey>,
    next_seq: u64,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
    evicted: Vec<(EntityKey, EvictionReason)>,
    stats: AccumulatorStats,
}

impl StreamingAccumulator {
    pub fn new(policy: EvictionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            touch_index: BTreeMap::new(),
            next_seq: 0,
            policy,
            clock,
            evicted: Vec::new(),
            stats: AccumulatorStats::default(),
        }
    }

    /// Fold a fragment into the entity's buffer and return the full
    /// accumulated field map.
    ///
    /// String values are appended to what the buffer already holds. `null`
    /// is the identity element and leaves the field untouched. Any other
    /// value replaces the field. A fragment for an identity with no live
    /// buffer (never opened, closed, or evicted) starts a fresh one.
    pub fn accumulate(&mut self, key: &EntityKey, fragment: FieldMap) -> FieldMap {
        let now = self.clock.now_ms();
        self.evict_expired(now);

        let seq = self.next_seq;
        self.next_seq += 1;
        let expires_at = self.policy.expires_at(now);

        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            debug!(entity = %key, "Streaming buffer opened");
            BufferEntry {
                partial_fields: FieldMap::new(),
                expires_at,
                touch_seq: seq,
                fragments: 0,
            }
        });
        if entry.touch_seq != seq {
            self.touch_index.remove(&entry.touch_seq);
            entry.touch_seq = seq;
            entry.expires_at = expires_at;
        }
        self.touch_index.insert(seq, key.clone());

        for (field, value) in fragment {
            match value {
                JsonValue::Null => {}
                JsonValue::String(piece) => match entry.partial_fields.get_mut(&field) {
                    Some(JsonValue::String(acc)) => acc.push_str(&piece),
                    _ => {
                        entry.partial_fields.insert(field, JsonValue::String(piece));
                    }
                },
                other => {
                    entry.partial_fields.insert(field, other);
                }
            }
        }
        entry.fragments += 1;
        self.stats.fragments += 1;

        let merged = entry.partial_fields.clone();
        let fragments = entry.fragments;

        self.evict_over_capacity();

        debug!(entity = %key, fragments = fragments, "Fragment accumulated");
        merged
    }

    /// Discard the buffer for `key`, returning what it held
    pub fn close(&mut self, key: &EntityKey) -> Option<FieldMap> {
        let entry = self.entries.remove(key)?;
        self.touch_index.remove(&entry.touch_seq);
        self.stats.closed += 1;
        debug!(entity = %key, fragments = entry.fragments, "Streaming buffer closed");
        Some(entry.partial_fields)
    }

    /// Best-effort partial value for an entity that is mid-stream
    pub fn peek(&self, key: &EntityKey) -> Option<&FieldMap> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|entry| !self.policy.is_expired(entry.expires_at, now))
            .map(|entry| &entry.partial_fields)
    }

    pub fn is_open(&self, key: &EntityKey) -> bool {
        self.peek(key).is_some()
    }

    /// Drop every expired buffer. Returns the number removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.evict_expired(now)
    }

    /// Evictions since the last call, oldest first
    pub fn take_evicted(&mut self) -> Vec<(EntityKey, EvictionReason)> {
        std::mem::take(&mut self.evicted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            open_buffers: self.entries.len(),
            ..self.stats
        }
    }

    /// Walk from the least recently touched entry and stop at the first one
    /// still alive. O(k) in the number of expired entries.
    fn evict_expired(&mut self, now: u64) -> usize {
        let mut removed = 0;

        while let Some((&seq, key)) = self.touch_index.first_key_value() {
            let expired = self
                .entries
                .get(key)
                .map_or(true, |entry| self.policy.is_expired(entry.expires_at, now));
            if !expired {
                break;
            }

            if let Some(key) = self.touch_index.remove(&seq) {
                if self.entries.remove(&key).is_some() {
                    debug!(entity = %key, "Streaming buffer expired");
                    self.stats.ttl_evictions += 1;
                    self.evicted.push((key, EvictionReason::Expired));
                    removed += 1;
                }
            }
        }

        removed
    }

    fn evict_over_capacity(&mut self) {
        while self.policy.over_capacity(self.entries.len()) {
            let Some((_, key)) = self.touch_index.pop_first() else {
                break;
            };
            if self.entries.remove(&key).is_some() {
                debug!(entity = %key, "Streaming buffer evicted (capacity)");
                self.stats.capacity_evictions += 1;
                self.evicted.push((key, EvictionReason::Capacity));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::clock::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn fields(value: JsonValue) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn accumulator(max: usize, ttl_ms: u64) -> (StreamingAccumulator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let acc = StreamingAccumulator::new(
            EvictionPolicy::new(max, Duration::from_millis(ttl_ms)),
            clock.clone(),
        );
        (acc, clock)
    }

    #[test]
    fn test_concatenates_fragments() {
        let (mut acc, _clock) = accumulator(10, 60_000);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "message": "Hel" })));
        let merged = acc.accumulate(&key, fields(json!({ "message": "lo" })));

        assert_eq!(merged.get("message"), Some(&json!("Hello")));
    }

    #[test]
    fn test_returns_full_map_not_delta() {
        let (mut acc, _clock) = accumulator(10, 60_000);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "message": "a", "title": "t" })));
        let merged = acc.accumulate(&key, fields(json!({ "message": "b" })));

        assert_eq!(merged, fields(json!({ "message": "ab", "title": "t" })));
    }

    #[test]
    fn test_null_is_identity() {
        let (mut acc, _clock) = accumulator(10, 60_000);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "message": null })));
        acc.accumulate(&key, fields(json!({ "message": "Hi" })));
        let merged = acc.accumulate(&key, fields(json!({ "message": null })));

        assert_eq!(merged.get("message"), Some(&json!("Hi")));
    }

    #[test]
    fn test_close_then_fragment_starts_empty() {
        let (mut acc, _clock) = accumulator(10, 60_000);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "message": "Hel" })));
        acc.accumulate(&key, fields(json!({ "message": "lo" })));
        assert_eq!(acc.close(&key).unwrap().get("message"), Some(&json!("Hello")));
        assert!(!acc.is_open(&key));

        let merged = acc.accumulate(&key, fields(json!({ "message": "new" })));
        assert_eq!(merged.get("message"), Some(&json!("new")));
    }

    #[test]
    fn test_non_string_value_replaces() {
        let (mut acc, _clock) = accumulator(10, 60_000);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "progress": 10 })));
        let merged = acc.accumulate(&key, fields(json!({ "progress": 40 })));
        assert_eq!(merged.get("progress"), Some(&json!(40)));
    }

    #[test]
    fn test_capacity_bound_evicts_lru() {
        let (mut acc, _clock) = accumulator(3, 60_000);

        for i in 0..4 {
            acc.accumulate(&EntityKey::new("Log", i.to_string()), fields(json!({ "m": "x" })));
        }

        assert_eq!(acc.len(), 3);
        assert!(!acc.is_open(&EntityKey::new("Log", "0")));
        assert_eq!(
            acc.take_evicted(),
            vec![(EntityKey::new("Log", "0"), EvictionReason::Capacity)]
        );
        assert_eq!(acc.stats().capacity_evictions, 1);
    }

    #[test]
    fn test_touch_refreshes_lru_position() {
        let (mut acc, _clock) = accumulator(2, 60_000);
        let a = EntityKey::new("Log", "a");
        let b = EntityKey::new("Log", "b");
        let c = EntityKey::new("Log", "c");

        acc.accumulate(&a, fields(json!({ "m": "1" })));
        acc.accumulate(&b, fields(json!({ "m": "1" })));
        acc.accumulate(&a, fields(json!({ "m": "2" })));
        acc.accumulate(&c, fields(json!({ "m": "1" })));

        assert!(acc.is_open(&a));
        assert!(!acc.is_open(&b));
        assert!(acc.is_open(&c));
    }

    #[test]
    fn test_ttl_slides_from_last_touch() {
        let (mut acc, clock) = accumulator(10, 100);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "m": "a" })));
        clock.advance(80);
        acc.accumulate(&key, fields(json!({ "m": "b" })));
        clock.advance(80);
        assert_eq!(acc.peek(&key).unwrap().get("m"), Some(&json!("ab")));

        clock.advance(20);
        assert!(acc.peek(&key).is_none());
        assert_eq!(acc.sweep_expired(), 1);
        assert!(acc.is_empty());
        assert_eq!(acc.stats().ttl_evictions, 1);
    }

    #[test]
    fn test_expired_buffer_restarts_on_fragment() {
        let (mut acc, clock) = accumulator(10, 100);
        let key = EntityKey::new("Log", "x");

        acc.accumulate(&key, fields(json!({ "m": "old" })));
        clock.advance(150);
        let merged = acc.accumulate(&key, fields(json!({ "m": "new" })));

        assert_eq!(merged.get("m"), Some(&json!("new")));
        assert_eq!(
            acc.take_evicted(),
            vec![(key.clone(), EvictionReason::Expired)]
        );
    }

    #[test]
    fn test_sweep_stops_at_first_live_entry() {
        let (mut acc, clock) = accumulator(10, 100);

        acc.accumulate(&EntityKey::new("Log", "1"), fields(json!({ "m": "a" })));
        clock.advance(60);
        acc.accumulate(&EntityKey::new("Log", "2"), fields(json!({ "m": "a" })));
        clock.advance(60);

        assert_eq!(acc.sweep_expired(), 1);
        assert_eq!(acc.len(), 1);
        assert!(acc.is_open(&EntityKey::new("Log", "2")));
    }
}
