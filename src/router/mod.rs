//! Change Event Router - classifies inbound events and applies them
//!
//! # Dispatch
//!
//! ```text
//!  inbound ──▶ validate ──┬─ PartialUpdate ──▶ StreamingAccumulator ──┬─ buffered (stop)
//!                         │                                           └─ terminal: merged Updated ─┐
//!                         ├─ Added / Updated ──────────────────────────────────────────────────────┼─▶ EntityStore.write
//!                         │                                                                        │   + link if listed
//!                         └─ Deleted ──▶ EntityStore.delete ──▶ QueryResultIndex.remove_everywhere │
//! ```
//!
//! Every item is processed to completion before the next one; there is no
//! I/O and nothing blocks. Malformed input is reported to the error sink and
//! dropped, so one bad event never stalls the stream.
//!
//! Any non-partial event for an identity closes that identity's streaming
//! buffer: the terminal payload is authoritative.
//!
//! While a buffer is open, a streamed string field is shown as the stored
//! value followed by the buffered fragments, so the live value only grows
//! until the terminal delivery replaces it.

pub mod event;
pub mod sink;

pub use event::{ChangeEvent, EventKind, InboundMessage, QueryResult, RawChangeEvent, RawEntity};
pub use sink::{CollectingErrorSink, ErrorSink, TracingErrorSink};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::index::{LinkOutcome, ListPolicies, ListState, MergePolicy, QueryResultIndex};
use crate::store::{Entity, EntityStore, FieldMap, WriteOutcome};
use crate::stream::StreamingAccumulator;
use crate::types::{EntityKey, EntityRef, ListKey, SyncCacheError};

/// What routing one event did
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// A fragment was folded into its streaming buffer. `live` holds the
    /// streamed fields as observers now see them.
    Buffered { key: EntityKey, live: FieldMap },
    /// The store was written (directly or from a closed stream) and the
    /// listed lists gained the reference
    Applied {
        key: EntityKey,
        write: WriteOutcome,
        linked: Vec<ListKey>,
    },
    /// The entity was deleted; `unlinked` lists lost the reference
    Removed {
        key: EntityKey,
        existed: bool,
        unlinked: Vec<ListKey>,
    },
    /// The event was rejected and reported to the error sink
    Dropped { reason: String },
}

/// Result of hydrating one query result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrateOutcome {
    pub written: usize,
    pub dropped: usize,
    pub link: LinkOutcome,
}

/// Entity as observers should see it: the stored record with any in-flight
/// streaming fields laid over it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEntity {
    #[serde(flatten)]
    pub key: EntityKey,
    pub fields: FieldMap,
    pub version: u64,
    pub streaming: bool,
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub events_routed: u64,
    pub events_dropped: u64,
    pub fragments_buffered: u64,
    pub streams_completed: u64,
    pub hydrations: u64,
}

/// Owns the store, index and accumulator and routes events through them
pub struct ChangeEventRouter {
    store: EntityStore,
    index: QueryResultIndex,
    accumulator: StreamingAccumulator,
    policies: ListPolicies,
    error_sink: Box<dyn ErrorSink>,
    stats: RouterStats,
}

impl ChangeEventRouter {
    pub fn new(
        store: EntityStore,
        index: QueryResultIndex,
        accumulator: StreamingAccumulator,
        policies: ListPolicies,
        error_sink: Box<dyn ErrorSink>,
    ) -> Self {
        Self {
            store,
            index,
            accumulator,
            policies,
            error_sink,
            stats: RouterStats::default(),
        }
    }

    /// Validate and route an event straight off the wire
    pub fn route_raw(&mut self, raw: RawChangeEvent) -> RouteOutcome {
        match ChangeEvent::try_from(raw) {
            Ok(event) => self.route(event),
            Err(e) => self.drop_event(&e, "route"),
        }
    }

    /// Decode a JSON event and route it
    pub fn route_json(&mut self, raw: &str) -> RouteOutcome {
        match ChangeEvent::from_json(raw) {
            Ok(event) => self.route(event),
            Err(e) => self.drop_event(&e, "decode"),
        }
    }

    /// Apply one validated event
    pub fn route(&mut self, event: ChangeEvent) -> RouteOutcome {
        self.stats.events_routed += 1;
        debug!(kind = event.kind().as_str(), entity = %event.key(), "Routing event");

        match event {
            ChangeEvent::PartialUpdate {
                key,
                fields,
                list_key,
                terminal,
            } => {
                let merged = self.accumulator.accumulate(&key, fields);
                let live = overlay_streamed(self.store.read(&key), &merged);
                if !terminal {
                    self.stats.fragments_buffered += 1;
                    return RouteOutcome::Buffered { key, live };
                }
                self.accumulator.close(&key);
                self.stats.streams_completed += 1;
                self.upsert(key, live, list_key)
            }
            ChangeEvent::Added {
                key,
                fields,
                list_key,
            }
            | ChangeEvent::Updated {
                key,
                fields,
                list_key,
            } => {
                self.accumulator.close(&key);
                self.upsert(key, fields, list_key)
            }
            ChangeEvent::Deleted { key, list_key } => {
                self.accumulator.close(&key);
                let existed = self.store.delete(&key).is_some();
                let unlinked = self.index.remove_everywhere(&key, list_key.as_ref());
                RouteOutcome::Removed {
                    key,
                    existed,
                    unlinked,
                }
            }
        }
    }

    /// Write a point-in-time query result into the store and link its
    /// items under the list. Items without a usable identity are reported
    /// and skipped; the rest still land.
    ///
    /// A hydration is a full refresh: it replaces the list wholesale unless
    /// the payload or an explicit list policy says otherwise. A payload with
    /// an empty list key is reported and dropped whole.
    pub fn hydrate(&mut self, result: QueryResult) -> HydrateOutcome {
        self.stats.hydrations += 1;

        let mut outcome = HydrateOutcome::default();
        if result.list_key.as_str().is_empty() {
            outcome.dropped = result.items.len();
            self.drop_event(
                &SyncCacheError::MalformedEvent("query result without listKey".to_string()),
                "hydrate",
            );
            return outcome;
        }

        let policy = result
            .policy
            .or_else(|| self.policies.explicit_policy_for(&result.list_key))
            .unwrap_or(MergePolicy::ReplaceWholesale);

        let mut refs: Vec<EntityRef> = Vec::with_capacity(result.items.len());

        for item in result.items {
            let (key, fields) = match item.into_parts() {
                Ok(parts) => parts,
                Err(e) => {
                    outcome.dropped += 1;
                    self.drop_event(&e, result.list_key.as_str());
                    continue;
                }
            };

            self.accumulator.close(&key);
            match self.store.write(&key, fields) {
                Ok(_) => {
                    outcome.written += 1;
                    refs.push(key);
                }
                Err(e) => {
                    outcome.dropped += 1;
                    self.drop_event(&e, result.list_key.as_str());
                }
            }
        }

        outcome.link = self.index.link(&result.list_key, refs, policy);

        debug!(
            list = %result.list_key,
            written = outcome.written,
            dropped = outcome.dropped,
            "Query result hydrated"
        );
        outcome
    }

    /// Merge into the store, then link under `list_key` if the entity is
    /// not already in that list. A single event never replaces a whole
    /// list, so replace-wholesale lists take it as append-if-absent.
    fn upsert(&mut self, key: EntityKey, fields: FieldMap, list_key: Option<ListKey>) -> RouteOutcome {
        let write = match self.store.write(&key, fields) {
            Ok(write) => write,
            Err(e) => return self.drop_event(&e, "write"),
        };

        let mut linked = Vec::new();
        if let Some(list_key) = list_key {
            if !self.index.contains(&list_key, &key) {
                let policy = match self.policies.policy_for(&list_key) {
                    MergePolicy::ReplaceWholesale => MergePolicy::AppendIfAbsent,
                    other => other,
                };
                if self.index.link(&list_key, vec![key.clone()], policy).changed() {
                    linked.push(list_key);
                }
            }
        }

        RouteOutcome::Applied { key, write, linked }
    }

    fn drop_event(&mut self, error: &SyncCacheError, context: &str) -> RouteOutcome {
        self.stats.events_dropped += 1;
        self.error_sink.report(error, context);
        RouteOutcome::Dropped {
            reason: error.to_string(),
        }
    }

    // ---------------------------------------------------------------------
    // Read side
    // ---------------------------------------------------------------------

    pub fn read(&self, key: &EntityKey) -> Option<&Entity> {
        self.store.read(key)
    }

    /// Stored record overlaid with in-flight streaming fields
    pub fn read_live(&self, key: &EntityKey) -> Option<LiveEntity> {
        let stored = self.store.read(key);
        let partial = self.accumulator.peek(key);

        if stored.is_none() && partial.is_none() {
            return None;
        }

        let mut fields = stored.map(|e| e.fields.clone()).unwrap_or_default();
        if let Some(partial) = partial {
            fields.extend(overlay_streamed(stored, partial));
        }

        Some(LiveEntity {
            key: key.clone(),
            fields,
            version: stored.map_or(0, |e| e.version),
            streaming: partial.is_some(),
        })
    }

    pub fn resolve(&self, list_key: &ListKey) -> ListState<'_> {
        self.index.resolve(list_key)
    }

    pub fn resolve_entities(&self, list_key: &ListKey) -> Option<Vec<&Entity>> {
        self.index.resolve_entities(list_key, &self.store)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn index(&self) -> &QueryResultIndex {
        &self.index
    }

    pub fn accumulator(&self) -> &StreamingAccumulator {
        &self.accumulator
    }

    /// Direct access for explicit invalidation and expiry sweeps.
    /// Entity writes must go through `route` or `hydrate`.
    pub fn index_mut(&mut self) -> &mut QueryResultIndex {
        &mut self.index
    }

    pub fn accumulator_mut(&mut self) -> &mut StreamingAccumulator {
        &mut self.accumulator
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}

/// Streamed fields as observers see them: a string fragment buffer is
/// appended to the stored string, anything else stands on its own.
fn overlay_streamed(stored: Option<&Entity>, partial: &FieldMap) -> FieldMap {
    partial
        .iter()
        .map(|(field, value)| {
            let shown = match (stored.and_then(|e| e.get(field)), value) {
                (Some(JsonValue::String(base)), JsonValue::String(tail)) => {
                    JsonValue::String(format!("{}{}", base, tail))
                }
                _ => value.clone(),
            };
            (field.clone(), shown)
        })
        .collect()
}
