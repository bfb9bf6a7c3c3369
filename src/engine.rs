//! Sync engine - the router plus update fan-out
//!
//! `SyncEngine` owns a [`ChangeEventRouter`] and a broadcast channel of
//! [`CacheUpdate`] notifications. Entity writes and removals are published
//! from inside the store (via a registered observer); list changes, stream
//! progress and buffer evictions are published from the routing outcome.
//!
//! Sending on the channel never blocks. With no subscribers, updates are
//! simply discarded.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::index::{ListState, QueryResultIndex};
use crate::router::{
    ChangeEvent, ChangeEventRouter, ErrorSink, HydrateOutcome, InboundMessage, LiveEntity,
    QueryResult, RawChangeEvent, RouteOutcome, RouterStats, TracingErrorSink,
};
use crate::store::{Entity, EntityStore, FieldMap, StoreObserver, WriteOutcome};
use crate::stream::{Clock, EvictionReason, StreamingAccumulator, SystemClock};
use crate::types::{EntityKey, ListKey, Result};

/// Notification published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheUpdate {
    EntityWritten {
        entity: EntityKey,
        version: u64,
        created: bool,
    },
    EntityRemoved {
        entity: EntityKey,
    },
    ListChanged {
        list_key: ListKey,
        inserted: usize,
        removed: usize,
    },
    /// Cumulative in-flight value after a fragment
    StreamProgress {
        entity: EntityKey,
        fields: FieldMap,
    },
    StreamEvicted {
        entity: EntityKey,
        reason: EvictionReason,
    },
    ListInvalidated {
        list_key: ListKey,
    },
}

/// Store observer that forwards writes and removals to the update channel
struct UpdatePublisher {
    update_tx: broadcast::Sender<CacheUpdate>,
}

impl StoreObserver for UpdatePublisher {
    fn entity_written(&self, entity: &Entity, outcome: WriteOutcome) {
        if matches!(outcome, WriteOutcome::Merged { changed: false }) {
            return;
        }
        let _ = self.update_tx.send(CacheUpdate::EntityWritten {
            entity: entity.key.clone(),
            version: entity.version,
            created: outcome.is_created(),
        });
    }

    fn entity_removed(&self, key: &EntityKey) {
        let _ = self.update_tx.send(CacheUpdate::EntityRemoved { entity: key.clone() });
    }
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub events_routed: u64,
    pub events_dropped: u64,
    pub hydrations: u64,
    pub streams_completed: u64,
    pub entities: usize,
    pub lists: usize,
    pub open_streams: usize,
    pub capacity_evictions: u64,
    pub ttl_evictions: u64,
}

/// Result of applying one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Routed(RouteOutcome),
    Hydrated(HydrateOutcome),
}

/// Cache engine with subscriptions
pub struct SyncEngine {
    router: ChangeEventRouter,
    update_tx: broadcast::Sender<CacheUpdate>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Create an engine on the system clock, logging dropped events
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock_and_sink(config, Arc::new(SystemClock), Box::new(TracingErrorSink))
    }

    /// Create an engine with an explicit clock and error sink
    pub fn with_clock_and_sink(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        error_sink: Box<dyn ErrorSink>,
    ) -> Result<Self> {
        config.validate()?;

        let (update_tx, _) = broadcast::channel(config.update_channel_capacity);

        let mut store = EntityStore::new();
        store.register_observer(Box::new(UpdatePublisher {
            update_tx: update_tx.clone(),
        }));

        let accumulator = StreamingAccumulator::new(config.eviction_policy(), clock);
        let router = ChangeEventRouter::new(
            store,
            QueryResultIndex::new(),
            accumulator,
            config.list_policies(),
            error_sink,
        );

        info!(
            max_streaming_entries = config.max_streaming_entries,
            streaming_ttl_ms = config.streaming_ttl_ms,
            "Sync engine initialized"
        );

        Ok(Self {
            router,
            update_tx,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to cache updates
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.update_tx.subscribe()
    }

    /// Sender half, for handles that hand out receivers without the engine
    pub fn update_sender(&self) -> broadcast::Sender<CacheUpdate> {
        self.update_tx.clone()
    }

    pub fn route(&mut self, event: ChangeEvent) -> RouteOutcome {
        let outcome = self.router.route(event);
        self.publish_outcome(&outcome);
        outcome
    }

    pub fn route_raw(&mut self, raw: RawChangeEvent) -> RouteOutcome {
        let outcome = self.router.route_raw(raw);
        self.publish_outcome(&outcome);
        outcome
    }

    pub fn route_json(&mut self, raw: &str) -> RouteOutcome {
        let outcome = self.router.route_json(raw);
        self.publish_outcome(&outcome);
        outcome
    }

    pub fn hydrate(&mut self, result: QueryResult) -> HydrateOutcome {
        let list_key = result.list_key.clone();
        let outcome = self.router.hydrate(result);
        if outcome.link.changed() {
            self.publish(CacheUpdate::ListChanged {
                list_key,
                inserted: outcome.link.inserted,
                removed: outcome.link.removed,
            });
        }
        self.publish_evictions();
        outcome
    }

    /// Apply an event or hydration payload
    pub fn apply(&mut self, message: InboundMessage) -> MessageOutcome {
        match message {
            InboundMessage::Event(raw) => MessageOutcome::Routed(self.route_raw(raw)),
            InboundMessage::Hydrate(result) => MessageOutcome::Hydrated(self.hydrate(result)),
        }
    }

    /// Evict expired streaming buffers. Returns how many were removed.
    pub fn sweep_expired(&mut self) -> usize {
        let swept = self.router.accumulator_mut().sweep_expired();
        if swept > 0 {
            debug!(swept, "Swept expired streaming buffers");
        }
        self.publish_evictions();
        swept
    }

    /// Forget a list so the next resolve reports no data
    pub fn invalidate(&mut self, list_key: &ListKey) -> bool {
        let removed = self.router.index_mut().invalidate(list_key);
        if removed {
            self.publish(CacheUpdate::ListInvalidated {
                list_key: list_key.clone(),
            });
        }
        removed
    }

    /// Forget every list whose key starts with `prefix`. Returns how many
    /// lists were dropped.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let keys = self.router.index_mut().invalidate_prefix(prefix);
        let count = keys.len();
        for list_key in keys {
            self.publish(CacheUpdate::ListInvalidated { list_key });
        }
        count
    }

    pub fn read(&self, key: &EntityKey) -> Option<&Entity> {
        self.router.read(key)
    }

    pub fn read_live(&self, key: &EntityKey) -> Option<LiveEntity> {
        self.router.read_live(key)
    }

    pub fn resolve(&self, list_key: &ListKey) -> ListState<'_> {
        self.router.resolve(list_key)
    }

    pub fn resolve_entities(&self, list_key: &ListKey) -> Option<Vec<&Entity>> {
        self.router.resolve_entities(list_key)
    }

    pub fn router(&self) -> &ChangeEventRouter {
        &self.router
    }

    pub fn stats(&self) -> EngineStats {
        let RouterStats {
            events_routed,
            events_dropped,
            hydrations,
            streams_completed,
            ..
        } = self.router.stats();
        let streaming = self.router.accumulator().stats();

        EngineStats {
            events_routed,
            events_dropped,
            hydrations,
            streams_completed,
            entities: self.router.store().len(),
            lists: self.router.index().len(),
            open_streams: streaming.open_buffers,
            capacity_evictions: streaming.capacity_evictions,
            ttl_evictions: streaming.ttl_evictions,
        }
    }

    fn publish_outcome(&mut self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Buffered { key, live } => {
                self.publish(CacheUpdate::StreamProgress {
                    entity: key.clone(),
                    fields: live.clone(),
                });
            }
            RouteOutcome::Applied { linked, .. } => {
                for list_key in linked {
                    self.publish(CacheUpdate::ListChanged {
                        list_key: list_key.clone(),
                        inserted: 1,
                        removed: 0,
                    });
                }
            }
            RouteOutcome::Removed { unlinked, .. } => {
                for list_key in unlinked {
                    self.publish(CacheUpdate::ListChanged {
                        list_key: list_key.clone(),
                        inserted: 0,
                        removed: 1,
                    });
                }
            }
            RouteOutcome::Dropped { .. } => {}
        }
        self.publish_evictions();
    }

    fn publish_evictions(&mut self) {
        for (entity, reason) in self.router.accumulator_mut().take_evicted() {
            self.publish(CacheUpdate::StreamEvicted { entity, reason });
        }
    }

    fn publish(&self, update: CacheUpdate) {
        // Err only means nobody is listening
        let _ = self.update_tx.send(update);
    }
}
