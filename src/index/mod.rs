//! Derived list views over the entity store

pub mod lists;
pub mod policy;

pub use lists::{LinkOutcome, ListState, QueryResultIndex};
pub use policy::{ListPolicies, MergePolicy};
