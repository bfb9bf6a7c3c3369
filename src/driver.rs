//! Async driver for the sync engine
//!
//! The engine itself is synchronous. This module puts it behind an
//! `Arc<RwLock<_>>` and runs a single tokio task that drains an inbound
//! channel, so events are still applied one at a time, in order, while
//! readers share the engine between writes.
//!
//! The same task runs the periodic expiry sweep for streaming buffers.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{CacheUpdate, EngineStats, SyncEngine};
use crate::router::{InboundMessage, LiveEntity};
use crate::store::Entity;
use crate::types::{EntityKey, EntityRef, ListKey};

/// Shared handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<RwLock<SyncEngine>>,
    update_tx: broadcast::Sender<CacheUpdate>,
}

impl EngineHandle {
    pub fn new(engine: SyncEngine) -> Self {
        let update_tx = engine.update_sender();
        Self {
            engine: Arc::new(RwLock::new(engine)),
            update_tx,
        }
    }

    /// Subscribe without taking the engine lock
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.update_tx.subscribe()
    }

    /// Apply a message directly, bypassing the inbound channel
    pub async fn apply(&self, message: InboundMessage) {
        self.engine.write().await.apply(message);
    }

    pub async fn read(&self, key: &EntityKey) -> Option<Entity> {
        self.engine.read().await.read(key).cloned()
    }

    pub async fn read_live(&self, key: &EntityKey) -> Option<LiveEntity> {
        self.engine.read().await.read_live(key)
    }

    /// References in list order, or `None` when the list was never fetched
    pub async fn resolve(&self, list_key: &ListKey) -> Option<Vec<EntityRef>> {
        self.engine.read().await.resolve(list_key).to_vec()
    }

    /// Entities in list order, skipping dangling references
    pub async fn resolve_entities(&self, list_key: &ListKey) -> Option<Vec<Entity>> {
        self.engine
            .read()
            .await
            .resolve_entities(list_key)
            .map(|entities| entities.into_iter().cloned().collect())
    }

    pub async fn stats(&self) -> EngineStats {
        self.engine.read().await.stats()
    }

    /// Shared engine, for callers that need several reads under one guard
    pub fn engine(&self) -> &Arc<RwLock<SyncEngine>> {
        &self.engine
    }
}

/// Spawn the task that feeds inbound messages into the engine.
///
/// The task stops when `shutdown_rx` fires or when every inbound sender
/// has been dropped, whichever comes first. Messages already queued when
/// the senders drop are still applied.
pub fn spawn_engine_task(
    handle: EngineHandle,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sweep_every = handle.engine.read().await.config().sweep_interval();
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        sweep.tick().await;

        info!(sweep_interval_ms = sweep_every.as_millis() as u64, "Sync engine started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync engine shutting down");
                    break;
                }
                message = inbound_rx.recv() => {
                    match message {
                        Some(message) => {
                            handle.engine.write().await.apply(message);
                        }
                        None => {
                            info!("Inbound channel closed, engine stopping");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    let swept = handle.engine.write().await.sweep_expired();
                    debug!(swept, "Streaming sweep tick");
                }
            }
        }

        info!("Sync engine stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::router::{CollectingErrorSink, QueryResult, RawEntity};
    use crate::stream::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn handle_with_clock(config: EngineConfig, clock: Arc<ManualClock>) -> EngineHandle {
        let engine =
            SyncEngine::with_clock_and_sink(config, clock, Box::new(CollectingErrorSink::new()))
                .unwrap();
        EngineHandle::new(engine)
    }

    fn event(raw: &str) -> InboundMessage {
        InboundMessage::from_json(raw).unwrap()
    }

    #[tokio::test]
    async fn test_task_applies_in_order_then_stops() {
        let handle = handle_with_clock(EngineConfig::default(), Arc::new(ManualClock::new(0)));
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = spawn_engine_task(handle.clone(), rx, shutdown_rx);

        tx.send(event(r#"{"kind":"added","type":"Log","id":"5","fields":{"text":"a"},"listKey":"logs:flow1"}"#))
            .await
            .unwrap();
        tx.send(event(r#"{"kind":"partialUpdate","type":"Log","id":"5","fields":{"text":"b"}}"#))
            .await
            .unwrap();
        tx.send(event(r#"{"kind":"updated","type":"Log","id":"5","fields":{"text":"ab","final":true}}"#))
            .await
            .unwrap();
        drop(tx);

        task.await.unwrap();

        let key = EntityKey::new("Log", "5");
        let log = handle.read(&key).await.unwrap();
        assert_eq!(log.get_str("text"), Some("ab"));
        assert_eq!(
            handle.resolve(&ListKey::new("logs:flow1")).await,
            Some(vec![key.clone()])
        );
        assert!(!handle.read_live(&key).await.unwrap().streaming);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let handle = handle_with_clock(EngineConfig::default(), Arc::new(ManualClock::new(0)));
        let (_tx, rx) = mpsc::channel::<InboundMessage>(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = spawn_engine_task(handle, rx, shutdown_rx);
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_sees_hydration() {
        let handle = handle_with_clock(EngineConfig::default(), Arc::new(ManualClock::new(0)));
        let mut updates = handle.subscribe();

        handle
            .apply(InboundMessage::Hydrate(QueryResult::new(
                "flows:all",
                vec![RawEntity::new("Flow", "1", json!({}))],
            )))
            .await;

        assert!(matches!(updates.recv().await.unwrap(), CacheUpdate::EntityWritten { created: true, .. }));
        assert!(matches!(updates.recv().await.unwrap(), CacheUpdate::ListChanged { inserted: 1, .. }));

        let flows = handle.resolve_entities(&ListKey::new("flows:all")).await.unwrap();
        assert_eq!(flows.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_tick_evicts_expired_buffers() {
        let clock = Arc::new(ManualClock::new(0));
        let config = EngineConfig {
            streaming_ttl_ms: 50,
            sweep_interval_ms: 20,
            ..Default::default()
        };
        let handle = handle_with_clock(config, clock.clone());
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_engine_task(handle.clone(), rx, shutdown_rx);

        tx.send(event(r#"{"kind":"partialUpdate","type":"Log","id":"1","fields":{"text":"x"}}"#))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.stats().await.open_streams, 1);

        clock.advance(50);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.stats().await.open_streams, 0);
        assert_eq!(handle.stats().await.ttl_evictions, 1);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
