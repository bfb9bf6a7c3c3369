//! Eviction policy for streaming buffers
//!
//! Two independent bounds, both applied only to the streaming accumulator:
//! a capacity bound (least-recently-touched entry goes first) and a TTL that
//! slides from the last touch. Entity records are never pressure-evicted.

use std::time::Duration;

use serde::Serialize;

/// Why a buffer entry was reclaimed before its terminal event arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The accumulator was over its entry limit
    Capacity,
    /// The entry went untouched for longer than the TTL
    Expired,
}

/// Capacity and time bounds for the streaming accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_entries: usize,
    ttl: Duration,
}

impl EvictionPolicy {
    /// `max_entries` is clamped to at least one so the entry being touched
    /// is never its own eviction victim.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry instant for an entry touched at `touched_at_ms`
    pub fn expires_at(&self, touched_at_ms: u64) -> u64 {
        touched_at_ms.saturating_add(self.ttl.as_millis() as u64)
    }

    pub fn is_expired(&self, expires_at_ms: u64, now_ms: u64) -> bool {
        now_ms >= expires_at_ms
    }

    pub fn over_capacity(&self, len: usize) -> bool {
        len > self.max_entries
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(500, Duration::from_secs(180))
    }
}
