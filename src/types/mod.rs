//! Shared types for the sync cache

pub mod error;
pub mod keys;

pub use error::{Result, SyncCacheError};
pub use keys::{EntityKey, EntityRef, ListKey};
