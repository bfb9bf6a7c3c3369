//! Per-list merge policies

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ListKey;

/// How an incoming batch of references combines with a list's current contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Append items whose identity is not already in the list.
    /// Existing positions are authoritative and never reordered.
    #[default]
    AppendIfAbsent,
    /// The incoming batch becomes the list
    ReplaceWholesale,
    /// Prepend items whose identity is not already in the list
    /// (most-recent-first feeds)
    PrependIfAbsent,
}

impl MergePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppendIfAbsent => "append-if-absent",
            Self::ReplaceWholesale => "replace-wholesale",
            Self::PrependIfAbsent => "prepend-if-absent",
        }
    }
}

/// Registry mapping list names to their merge policy
#[derive(Debug, Clone, Default)]
pub struct ListPolicies {
    by_name: HashMap<String, MergePolicy>,
    fallback: MergePolicy,
}

impl ListPolicies {
    pub fn new(fallback: MergePolicy) -> Self {
        Self {
            by_name: HashMap::new(),
            fallback,
        }
    }

    pub fn with_policy(mut self, list_name: &str, policy: MergePolicy) -> Self {
        self.set(list_name, policy);
        self
    }

    pub fn set(&mut self, list_name: &str, policy: MergePolicy) {
        self.by_name.insert(list_name.to_string(), policy);
    }

    /// Policy for a list key, looked up by its list name.
    ///
    /// An exact match on the full key wins over the list name, so a single
    /// list can be configured differently from its siblings.
    pub fn policy_for(&self, list_key: &ListKey) -> MergePolicy {
        self.explicit_policy_for(list_key).unwrap_or(self.fallback)
    }

    /// Configured policy for a list key, if any. `None` means the list only
    /// has the fallback, which callers with their own default can skip.
    pub fn explicit_policy_for(&self, list_key: &ListKey) -> Option<MergePolicy> {
        self.by_name
            .get(list_key.as_str())
            .or_else(|| self.by_name.get(list_key.list_name()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup_by_list_name() {
        let policies = ListPolicies::new(MergePolicy::AppendIfAbsent)
            .with_policy("flows", MergePolicy::ReplaceWholesale)
            .with_policy("feed", MergePolicy::PrependIfAbsent);

        assert_eq!(policies.policy_for(&ListKey::new("flows:all")), MergePolicy::ReplaceWholesale);
        assert_eq!(policies.policy_for(&ListKey::new("feed:user1")), MergePolicy::PrependIfAbsent);
        assert_eq!(policies.policy_for(&ListKey::new("logs:flow1")), MergePolicy::AppendIfAbsent);
        assert_eq!(policies.explicit_policy_for(&ListKey::new("logs:flow1")), None);
        assert_eq!(
            policies.explicit_policy_for(&ListKey::new("feed:user1")),
            Some(MergePolicy::PrependIfAbsent)
        );
    }

    #[test]
    fn test_exact_key_overrides_list_name() {
        let policies = ListPolicies::new(MergePolicy::AppendIfAbsent)
            .with_policy("logs", MergePolicy::AppendIfAbsent)
            .with_policy("logs:archive", MergePolicy::ReplaceWholesale);

        assert_eq!(policies.policy_for(&ListKey::new("logs:archive")), MergePolicy::ReplaceWholesale);
        assert_eq!(policies.policy_for(&ListKey::new("logs:flow1")), MergePolicy::AppendIfAbsent);
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: MergePolicy = serde_json::from_str("\"prepend-if-absent\"").unwrap();
        assert_eq!(policy, MergePolicy::PrependIfAbsent);
        assert_eq!(MergePolicy::ReplaceWholesale.as_str(), "replace-wholesale");
    }
}
