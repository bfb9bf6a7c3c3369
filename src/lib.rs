//! Sync Cache Core - normalized client-side cache for live dashboards
//!
//! Keeps one normalized entity graph consistent across point-in-time query
//! results, a continuous stream of server-pushed change events, and
//! streaming partial updates that arrive fragment by fragment.
//!
//! ## Components
//!
//! - **Store**: `(type, id) -> record` map with field-level merge
//! - **Index**: derived list views holding references, with per-list merge policy
//! - **Stream**: bounded accumulator for in-flight partial fields
//! - **Router**: validates and dispatches each inbound event
//! - **Engine**: router plus broadcast of cache updates
//! - **Driver**: tokio task feeding the engine from a channel
//!
//! ```no_run
//! use sync_cache_core::{ChangeEvent, EngineConfig, EntityKey, ListKey, SyncEngine};
//!
//! let mut engine = SyncEngine::new(EngineConfig::default())?;
//! let log = EntityKey::new("Log", "5");
//! engine.route(ChangeEvent::added(log.clone(), Default::default()).in_list("logs:flow1"));
//! assert_eq!(engine.resolve(&ListKey::new("logs:flow1")).refs(), &[log]);
//! # Ok::<(), sync_cache_core::SyncCacheError>(())
//! ```

pub mod config;
pub mod driver;
pub mod engine;
pub mod index;
pub mod router;
pub mod store;
pub mod stream;
pub mod types;

pub use config::{EngineConfig, ReplayArgs};
pub use driver::{spawn_engine_task, EngineHandle};
pub use engine::{CacheUpdate, EngineStats, MessageOutcome, SyncEngine};
pub use index::{ListPolicies, ListState, MergePolicy, QueryResultIndex};
pub use router::{
    ChangeEvent, ChangeEventRouter, ErrorSink, InboundMessage, LiveEntity, QueryResult,
    RawChangeEvent, RawEntity, RouteOutcome,
};
pub use store::{Entity, EntityStore, FieldMap};
pub use stream::{EvictionPolicy, StreamingAccumulator};
pub use types::{EntityKey, EntityRef, ListKey, Result, SyncCacheError};
