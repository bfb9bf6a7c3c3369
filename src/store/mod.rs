//! Normalized entity storage

pub mod entity;

pub use entity::{Entity, EntityStore, FieldMap, StoreObserver, WriteOutcome};
