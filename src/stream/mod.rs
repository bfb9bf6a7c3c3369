//! Streaming partial updates
//!
//! - [`accumulator`]: per-entity fragment buffers
//! - [`eviction`]: capacity and TTL bounds for those buffers
//! - [`clock`]: time source used for expiry

pub mod accumulator;
pub mod clock;
pub mod eviction;

pub use accumulator::{AccumulatorStats, StreamingAccumulator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use eviction::{EvictionPolicy, EvictionReason};
