//! Query Result Index - derived, keyed lists of entity references
//!
//! Lists hold references only. Entity data is always read through the
//! entity store, so an `Updated` event never needs to touch a list.
//!
//! A reverse index (reference -> list keys holding it) makes removal on
//! delete proportional to the number of lists the entity is actually in,
//! rather than a sweep over every list.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::policy::MergePolicy;
use crate::store::{Entity, EntityStore};
use crate::types::{EntityRef, ListKey};

/// Outcome of resolving a list key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState<'a> {
    /// Nothing has ever been linked under this key
    NoData,
    /// The list has been populated (possibly with zero items)
    Fetched(&'a [EntityRef]),
}

impl<'a> ListState<'a> {
    pub fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }

    /// References in list order, empty for `NoData`
    pub fn refs(&self) -> &'a [EntityRef] {
        match self {
            Self::NoData => &[],
            Self::Fetched(refs) => refs,
        }
    }

    pub fn to_vec(&self) -> Option<Vec<EntityRef>> {
        match self {
            Self::NoData => None,
            Self::Fetched(refs) => Some(refs.to_vec()),
        }
    }
}

/// Net effect of a `link` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub inserted: usize,
    pub removed: usize,
}

impl LinkOutcome {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.removed > 0
    }
}

/// Keyed lists of references with per-call merge policy
#[derive(Debug, Default)]
pub struct QueryResultIndex {
    lists: HashMap<ListKey, Vec<EntityRef>>,
    membership: HashMap<EntityRef, HashSet<ListKey>>,
}

impl QueryResultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a list, distinguishing "never fetched" from empty
    pub fn resolve(&self, list_key: &ListKey) -> ListState<'_> {
        match self.lists.get(list_key) {
            Some(refs) => ListState::Fetched(refs),
            None => ListState::NoData,
        }
    }

    /// Materialize a list against the store. References whose entity is
    /// missing are skipped rather than treated as an error.
    pub fn resolve_entities<'s>(
        &self,
        list_key: &ListKey,
        store: &'s EntityStore,
    ) -> Option<Vec<&'s Entity>> {
        let refs = self.lists.get(list_key)?;
        Some(refs.iter().filter_map(|r| store.read(r)).collect())
    }

    /// Combine `refs` into the list under `policy`. Linking always marks
    /// the list as fetched, even when `refs` is empty.
    pub fn link(&mut self, list_key: &ListKey, refs: Vec<EntityRef>, policy: MergePolicy) -> LinkOutcome {
        let list = self.lists.entry(list_key.clone()).or_default();
        let mut outcome = LinkOutcome::default();

        match policy {
            MergePolicy::AppendIfAbsent | MergePolicy::PrependIfAbsent => {
                let mut present: HashSet<&EntityRef> = list.iter().collect();
                let mut fresh = Vec::new();
                for r in &refs {
                    if present.insert(r) {
                        fresh.push(r.clone());
                    }
                }
                outcome.inserted = fresh.len();

                for r in &fresh {
                    self.membership
                        .entry(r.clone())
                        .or_default()
                        .insert(list_key.clone());
                }

                if policy == MergePolicy::AppendIfAbsent {
                    list.extend(fresh);
                } else {
                    list.splice(0..0, fresh);
                }
            }
            MergePolicy::ReplaceWholesale => {
                let mut seen = HashSet::new();
                let incoming: Vec<EntityRef> =
                    refs.into_iter().filter(|r| seen.insert(r.clone())).collect();

                let previous = std::mem::replace(list, incoming);
                let previous: HashSet<EntityRef> = previous.into_iter().collect();

                for r in previous.difference(&seen) {
                    outcome.removed += 1;
                    Self::forget_membership(&mut self.membership, r, list_key);
                }
                for r in seen.difference(&previous) {
                    outcome.inserted += 1;
                    self.membership
                        .entry(r.clone())
                        .or_default()
                        .insert(list_key.clone());
                }
            }
        }

        debug!(
            list = %list_key,
            policy = policy.as_str(),
            inserted = outcome.inserted,
            removed = outcome.removed,
            "List linked"
        );

        outcome
    }

    /// Remove one reference from one list
    pub fn unlink(&mut self, list_key: &ListKey, r: &EntityRef) -> bool {
        let Some(list) = self.lists.get_mut(list_key) else {
            return false;
        };
        let before = list.len();
        list.retain(|item| item != r);
        let removed = list.len() != before;
        if removed {
            Self::forget_membership(&mut self.membership, r, list_key);
        }
        removed
    }

    /// Remove a reference from every list holding it. `hint` is checked
    /// first; the reverse index then covers every other list.
    ///
    /// Returns the keys of the lists that changed.
    pub fn remove_everywhere(&mut self, r: &EntityRef, hint: Option<&ListKey>) -> Vec<ListKey> {
        let mut touched = Vec::new();

        if let Some(list_key) = hint {
            if self.unlink(list_key, r) {
                touched.push(list_key.clone());
            }
        }

        if let Some(keys) = self.membership.remove(r) {
            for list_key in keys {
                if let Some(list) = self.lists.get_mut(&list_key) {
                    let before = list.len();
                    list.retain(|item| item != r);
                    if list.len() != before {
                        touched.push(list_key);
                    }
                }
            }
        }

        if !touched.is_empty() {
            debug!(entity = %r, lists = touched.len(), "Reference removed from lists");
        }
        touched
    }

    /// Whether the list currently holds the reference
    pub fn contains(&self, list_key: &ListKey, r: &EntityRef) -> bool {
        self.membership
            .get(r)
            .is_some_and(|keys| keys.contains(list_key))
    }

    /// Drop a list back to the "no data" state
    pub fn invalidate(&mut self, list_key: &ListKey) -> bool {
        let Some(list) = self.lists.remove(list_key) else {
            return false;
        };
        for r in &list {
            Self::forget_membership(&mut self.membership, r, list_key);
        }
        debug!(list = %list_key, "List invalidated");
        true
    }

    /// Invalidate every list whose key starts with `prefix`, returning the
    /// keys that were dropped
    pub fn invalidate_prefix(&mut self, prefix: &str) -> Vec<ListKey> {
        let mut keys: Vec<ListKey> = self
            .lists
            .keys()
            .filter(|key| key.as_str().starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();

        for key in &keys {
            self.invalidate(key);
        }

        if !keys.is_empty() {
            debug!(prefix = prefix, count = keys.len(), "Invalidated lists");
        }
        keys
    }

    pub fn list_keys(&self) -> impl Iterator<Item = &ListKey> {
        self.lists.keys()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    fn forget_membership(
        membership: &mut HashMap<EntityRef, HashSet<ListKey>>,
        r: &EntityRef,
        list_key: &ListKey,
    ) {
        if let Some(keys) = membership.get_mut(r) {
            keys.remove(list_key);
            if keys.is_empty() {
                membership.remove(r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldMap;
    use crate::types::EntityKey;

    fn r(id: &str) -> EntityRef {
        EntityKey::new("Log", id)
    }

    fn ids(state: ListState<'_>) -> Vec<String> {
        state.refs().iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_unknown_key_is_no_data() {
        let index = QueryResultIndex::new();
        assert_eq!(index.resolve(&ListKey::new("logs:x")), ListState::NoData);
    }

    #[test]
    fn test_empty_link_is_fetched_not_no_data() {
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("logs:x");
        index.link(&key, vec![], MergePolicy::ReplaceWholesale);

        let state = index.resolve(&key);
        assert!(state.is_fetched());
        assert!(state.refs().is_empty());
    }

    #[test]
    fn test_append_if_absent_preserves_position() {
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("logs:flow1");

        index.link(&key, vec![r("1")], MergePolicy::AppendIfAbsent);
        let outcome = index.link(&key, vec![r("2"), r("1")], MergePolicy::AppendIfAbsent);

        assert_eq!(outcome.inserted, 1);
        assert_eq!(ids(index.resolve(&key)), vec!["1", "2"]);
    }

    #[test]
    fn test_append_dedups_within_batch() {
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("logs:flow1");

        index.link(&key, vec![r("1"), r("1"), r("2")], MergePolicy::AppendIfAbsent);
        assert_eq!(ids(index.resolve(&key)), vec!["1", "2"]);
    }

    #[test]
    fn test_prepend_if_absent() {
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("feed:all");

        index.link(&key, vec![r("1")], MergePolicy::PrependIfAbsent);
        index.link(&key, vec![r("3"), r("2"), r("1")], MergePolicy::PrependIfAbsent);

        assert_eq!(ids(index.resolve(&key)), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_replace_wholesale_updates_membership() {
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("flows:all");

        index.link(&key, vec![r("1"), r("2")], MergePolicy::ReplaceWholesale);
        let outcome = index.link(&key, vec![r("3"), r("2"), r("3")], MergePolicy::ReplaceWholesale);

        assert_eq!(outcome, LinkOutcome { inserted: 1, removed: 1 });
        assert_eq!(ids(index.resolve(&key)), vec!["3", "2"]);
        assert!(!index.contains(&key, &r("1")));
        assert!(!index.membership.contains_key(&r("1")));
    }

    #[test]
    fn test_remove_everywhere_purges_all_lists() {
        let mut index = QueryResultIndex::new();
        let a = ListKey::new("logs:flow1");
        let b = ListKey::new("logs:errors");

        index.link(&a, vec![r("1"), r("2")], MergePolicy::AppendIfAbsent);
        index.link(&b, vec![r("1")], MergePolicy::AppendIfAbsent);

        let mut touched = index.remove_everywhere(&r("1"), None);
        touched.sort();
        assert_eq!(touched, vec![b.clone(), a.clone()]);

        assert_eq!(ids(index.resolve(&a)), vec!["2"]);
        assert!(index.resolve(&b).is_fetched());
        assert!(index.resolve(&b).refs().is_empty());
        assert!(!index.membership.contains_key(&r("1")));
    }

    #[test]
    fn test_remove_with_hint() {
        let mut index = QueryResultIndex::new();
        let a = ListKey::new("logs:flow1");
        index.link(&a, vec![r("1")], MergePolicy::AppendIfAbsent);

        let touched = index.remove_everywhere(&r("1"), Some(&a));
        assert_eq!(touched, vec![a.clone()]);
        assert!(index.resolve(&a).refs().is_empty());
    }

    #[test]
    fn test_invalidate_prefix() {
        let mut index = QueryResultIndex::new();
        index.link(&ListKey::new("logs:flow1"), vec![r("1")], MergePolicy::AppendIfAbsent);
        index.link(&ListKey::new("logs:flow2"), vec![r("2")], MergePolicy::AppendIfAbsent);
        index.link(&ListKey::new("flows:all"), vec![], MergePolicy::ReplaceWholesale);

        assert_eq!(
            index.invalidate_prefix("logs:"),
            vec![ListKey::new("logs:flow1"), ListKey::new("logs:flow2")]
        );
        assert_eq!(index.resolve(&ListKey::new("logs:flow1")), ListState::NoData);
        assert!(!index.membership.contains_key(&r("1")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_resolve_entities_skips_dangling() {
        let mut store = EntityStore::new();
        let mut index = QueryResultIndex::new();
        let key = ListKey::new("logs:flow1");

        store.write(&r("1"), FieldMap::new()).unwrap();
        index.link(&key, vec![r("1"), r("2")], MergePolicy::AppendIfAbsent);

        let entities = index.resolve_entities(&key, &store).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].key, r("1"));
        assert!(index.resolve_entities(&ListKey::new("nope"), &store).is_none());
    }
}
