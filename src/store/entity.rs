//! Entity Store - normalized `(type, id) -> record` map
//!
//! Ground truth for all entity data. Writes merge field by field: fields in
//! the incoming write overwrite, fields absent from it are preserved. Records
//! are only ever removed by an explicit delete, never for cache pressure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::types::{EntityKey, Result, SyncCacheError};

/// Field map carried by entities and events
pub type FieldMap = Map<String, JsonValue>;

/// A normalized entity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(flatten)]
    pub key: EntityKey,
    pub fields: FieldMap,
    /// Number of writes merged into this record since creation
    pub version: u64,
}

impl Entity {
    fn new(key: EntityKey) -> Self {
        Self {
            key,
            fields: FieldMap::new(),
            version: 0,
        }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Convenience accessor for string-valued fields
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }
}

/// Result of a single `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No record existed; one was created
    Created,
    /// An existing record was merged into; `changed` is false when every
    /// incoming field already held the same value
    Merged { changed: bool },
}

impl WriteOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Dependent notified synchronously from inside `write` and `delete`.
pub trait StoreObserver: Send + Sync {
    fn entity_written(&self, entity: &Entity, outcome: WriteOutcome);
    fn entity_removed(&self, key: &EntityKey);
}

/// Normalized entity store
#[derive(Default)]
pub struct EntityStore {
    records: HashMap<EntityKey, Entity>,
    observers: Vec<Box<dyn StoreObserver>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependent that hears about every write and delete
    pub fn register_observer(&mut self, observer: Box<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    /// Merge `fields` into the record for `key`, creating it if absent.
    ///
    /// An incomplete identity is a caller bug, not a data anomaly, and is
    /// rejected with [`SyncCacheError::Contract`].
    pub fn write(&mut self, key: &EntityKey, fields: FieldMap) -> Result<WriteOutcome> {
        if !key.is_complete() {
            return Err(SyncCacheError::Contract(format!(
                "write requires both type and id, got '{}'",
                key
            )));
        }

        let mut outcome = WriteOutcome::Merged { changed: false };
        let record = self.records.entry(key.clone()).or_insert_with(|| {
            outcome = WriteOutcome::Created;
            Entity::new(key.clone())
        });

        let mut changed = false;
        for (field, value) in fields {
            if record.fields.get(&field) != Some(&value) {
                record.fields.insert(field, value);
                changed = true;
            }
        }
        record.version += 1;

        if !outcome.is_created() {
            outcome = WriteOutcome::Merged { changed };
        }

        debug!(entity = %key, version = record.version, ?outcome, "Entity written");

        for observer in &self.observers {
            observer.entity_written(record, outcome);
        }

        Ok(outcome)
    }

    pub fn read(&self, key: &EntityKey) -> Option<&Entity> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.contains_key(key)
    }

    /// Remove the record for `key`. Observers are notified before this
    /// returns, so no dependent is left holding a live view of it.
    pub fn delete(&mut self, key: &EntityKey) -> Option<Entity> {
        let removed = self.records.remove(key)?;

        debug!(entity = %key, "Entity deleted");

        for observer in &self.observers {
            observer.entity_removed(key);
        }

        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
