//! Identity and list key definitions
//!
//! Entities are addressed by `(type, id)`. Derived lists are addressed by a
//! string key built deterministically from a list name and its filter args.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// Identity of a normalized entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type name (e.g., "Log", "Flow")
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Entity id, unique within its type
    pub id: String,
}

/// Pointer to an entity stored inside list indices.
///
/// A reference never owns entity data; resolving it goes through the
/// entity store, and a reference whose entity is gone resolves as absent.
pub type EntityRef = EntityKey;

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Both halves of the identity are present
    pub fn is_complete(&self) -> bool {
        !self.entity_type.is_empty() && !self.id.is_empty()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Key of a derived query list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListKey(String);

impl ListKey {
    /// Use a key exactly as the caller spelled it (e.g., `"logs:flow1"`)
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key for a list narrowed by a single scope value: `{list_name}:{scope}`
    pub fn scoped(list_name: &str, scope: &str) -> Self {
        Self(format!("{}:{}", list_name, scope))
    }

    /// Key for a list query with arbitrary filter args.
    ///
    /// Args are serialized canonically (object keys sorted at every depth)
    /// and hashed, so `{"a":1,"b":2}` and `{"b":2,"a":1}` land on one key.
    pub fn for_query(list_name: &str, args: &JsonValue) -> Self {
        let is_empty = match args {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        };

        let args_hash = if is_empty {
            "empty".to_string()
        } else {
            let mut canonical = String::new();
            write_canonical(args, &mut canonical);
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            let hash = hasher.finalize();
            hex::encode(&hash[..8])
        };

        Self(format!("{}:{}", list_name, args_hash))
    }

    /// Leading segment of the key, used to look up the list's merge policy
    pub fn list_name(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ListKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new("Log", "5");
        assert_eq!(key.to_string(), "Log:5");
        assert!(key.is_complete());
        assert!(!EntityKey::new("Log", "").is_complete());
    }

    #[test]
    fn test_entity_key_serializes_type_field() {
        let key = EntityKey::new("Log", "5");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, json!({ "type": "Log", "id": "5" }));
    }

    #[test]
    fn test_list_key_deterministic_across_arg_order() {
        let a = ListKey::for_query("logs", &json!({ "flow": "f1", "level": "info" }));
        let b = ListKey::for_query("logs", &json!({ "level": "info", "flow": "f1" }));
        assert_eq!(a, b);
        assert_eq!(a.list_name(), "logs");
    }

    #[test]
    fn test_list_key_different_args_different_keys() {
        let a = ListKey::for_query("logs", &json!({ "flow": "f1" }));
        let b = ListKey::for_query("logs", &json!({ "flow": "f2" }));
        assert_ne!(a, b);
    }

    #[test]
    fn test_list_key_empty_args() {
        assert_eq!(ListKey::for_query("flows", &JsonValue::Null).as_str(), "flows:empty");
        assert_eq!(ListKey::for_query("flows", &json!({})).as_str(), "flows:empty");
    }

    #[test]
    fn test_scoped_list_key() {
        let key = ListKey::scoped("logs", "flow1");
        assert_eq!(key.as_str(), "logs:flow1");
        assert_eq!(key.list_name(), "logs");
        assert_eq!(ListKey::from("logs:flow1"), key);
    }
}
