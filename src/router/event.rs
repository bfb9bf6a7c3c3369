//! Inbound change events and query results
//!
//! The transport hands over loosely-typed JSON. [`RawChangeEvent`] mirrors
//! that wire shape with every field optional; converting it into a
//! [`ChangeEvent`] is the validation boundary. Past that point an event
//! always carries a complete identity and a field map.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::index::MergePolicy;
use crate::store::FieldMap;
use crate::types::{EntityKey, ListKey, Result, SyncCacheError};

/// Event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
    PartialUpdate,
}

impl EventKind {
    /// Parse a wire `kind`, accepting the common spellings
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "added" | "add" | "created" | "insert" => Some(Self::Added),
            "updated" | "update" | "changed" => Some(Self::Updated),
            "deleted" | "delete" | "removed" => Some(Self::Deleted),
            "partialupdate" | "partial" => Some(Self::PartialUpdate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::PartialUpdate => "partialUpdate",
        }
    }
}

/// Change event as it arrives on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, rename = "type", alias = "__typename")]
    pub entity_type: Option<String>,
    /// String or number on the wire
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub fields: Option<JsonValue>,
    #[serde(default)]
    pub list_key: Option<String>,
    #[serde(default)]
    pub is_partial: Option<bool>,
}

/// Validated change event
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added {
        key: EntityKey,
        fields: FieldMap,
        list_key: Option<ListKey>,
    },
    Updated {
        key: EntityKey,
        fields: FieldMap,
        list_key: Option<ListKey>,
    },
    Deleted {
        key: EntityKey,
        list_key: Option<ListKey>,
    },
    /// A fragment of one or more streaming fields. `terminal` marks the
    /// last fragment: the buffer is closed and its merged value applied.
    PartialUpdate {
        key: EntityKey,
        fields: FieldMap,
        list_key: Option<ListKey>,
        terminal: bool,
    },
}

impl ChangeEvent {
    pub fn added(key: EntityKey, fields: FieldMap) -> Self {
        Self::Added { key, fields, list_key: None }
    }

    pub fn updated(key: EntityKey, fields: FieldMap) -> Self {
        Self::Updated { key, fields, list_key: None }
    }

    pub fn deleted(key: EntityKey) -> Self {
        Self::Deleted { key, list_key: None }
    }

    pub fn partial(key: EntityKey, fields: FieldMap) -> Self {
        Self::PartialUpdate {
            key,
            fields,
            list_key: None,
            terminal: false,
        }
    }

    /// Attach the list this event should be linked under
    pub fn in_list(mut self, list: impl Into<ListKey>) -> Self {
        let list = list.into();
        match &mut self {
            Self::Added { list_key, .. }
            | Self::Updated { list_key, .. }
            | Self::Deleted { list_key, .. }
            | Self::PartialUpdate { list_key, .. } => *list_key = Some(list),
        }
        self
    }

    /// Mark a partial update as the final fragment. No-op for other kinds.
    pub fn terminal(mut self) -> Self {
        if let Self::PartialUpdate { terminal, .. } = &mut self {
            *terminal = true;
        }
        self
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added { .. } => EventKind::Added,
            Self::Updated { .. } => EventKind::Updated,
            Self::Deleted { .. } => EventKind::Deleted,
            Self::PartialUpdate { .. } => EventKind::PartialUpdate,
        }
    }

    pub fn key(&self) -> &EntityKey {
        match self {
            Self::Added { key, .. }
            | Self::Updated { key, .. }
            | Self::Deleted { key, .. }
            | Self::PartialUpdate { key, .. } => key,
        }
    }

    pub fn list_key(&self) -> Option<&ListKey> {
        match self {
            Self::Added { list_key, .. }
            | Self::Updated { list_key, .. }
            | Self::Deleted { list_key, .. }
            | Self::PartialUpdate { list_key, .. } => list_key.as_ref(),
        }
    }

    /// Decode and validate a single JSON event
    pub fn from_json(raw: &str) -> Result<Self> {
        let raw: RawChangeEvent = serde_json::from_str(raw)?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawChangeEvent> for ChangeEvent {
    type Error = SyncCacheError;

    fn try_from(raw: RawChangeEvent) -> Result<Self> {
        let kind_str = raw
            .kind
            .as_deref()
            .ok_or_else(|| SyncCacheError::MalformedEvent("missing kind".to_string()))?;
        let mut kind = EventKind::parse(kind_str).ok_or_else(|| {
            SyncCacheError::MalformedEvent(format!("unknown kind '{}'", kind_str))
        })?;

        let key = parse_identity(raw.entity_type, raw.id.as_ref())?;

        // A non-partial kind flagged isPartial is still a fragment
        if raw.is_partial == Some(true) && kind != EventKind::Deleted {
            kind = EventKind::PartialUpdate;
        }

        let list_key = raw.list_key.filter(|k| !k.is_empty()).map(ListKey::new);

        let fields = if kind == EventKind::Deleted {
            FieldMap::new()
        } else {
            parse_fields(raw.fields, &key)?
        };

        Ok(match kind {
            EventKind::Added => Self::Added { key, fields, list_key },
            EventKind::Updated => Self::Updated { key, fields, list_key },
            EventKind::Deleted => Self::Deleted { key, list_key },
            EventKind::PartialUpdate => Self::PartialUpdate {
                key,
                fields,
                list_key,
                terminal: raw.is_partial == Some(false),
            },
        })
    }
}

/// Entity as returned by a point-in-time query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default, rename = "type", alias = "__typename")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub fields: Option<JsonValue>,
}

impl RawEntity {
    pub fn new(entity_type: &str, id: &str, fields: JsonValue) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            id: Some(JsonValue::String(id.to_string())),
            fields: Some(fields),
        }
    }

    /// Validate into an identity and field map
    pub fn into_parts(self) -> Result<(EntityKey, FieldMap)> {
        let key = parse_identity(self.entity_type, self.id.as_ref())?;
        let fields = parse_fields(self.fields, &key)?;
        Ok((key, fields))
    }
}

/// Point-in-time query result to hydrate a list from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub list_key: ListKey,
    /// Overrides the configured policy for this list
    #[serde(default)]
    pub policy: Option<MergePolicy>,
    pub items: Vec<RawEntity>,
}

impl QueryResult {
    pub fn new(list_key: impl Into<ListKey>, items: Vec<RawEntity>) -> Self {
        Self {
            list_key: list_key.into(),
            policy: None,
            items,
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// One line of inbound traffic: either a change event or a query result
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Event(RawChangeEvent),
    Hydrate(QueryResult),
}

impl InboundMessage {
    /// Decode a JSON line. Objects carrying `items` are query results.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(raw)?;
        if value.get("items").is_some() {
            Ok(Self::Hydrate(serde_json::from_value(value)?))
        } else {
            Ok(Self::Event(serde_json::from_value(value)?))
        }
    }
}

impl From<QueryResult> for InboundMessage {
    fn from(result: QueryResult) -> Self {
        Self::Hydrate(result)
    }
}

impl From<RawChangeEvent> for InboundMessage {
    fn from(event: RawChangeEvent) -> Self {
        Self::Event(event)
    }
}

fn parse_identity(entity_type: Option<String>, id: Option<&JsonValue>) -> Result<EntityKey> {
    let entity_type = entity_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SyncCacheError::MalformedEvent("missing type".to_string()))?;

    let id = match id {
        Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => {
            return Err(SyncCacheError::MalformedEvent(format!(
                "missing id for type '{}'",
                entity_type
            )))
        }
    };

    Ok(EntityKey::new(entity_type, id))
}

fn parse_fields(fields: Option<JsonValue>, key: &EntityKey) -> Result<FieldMap> {
    match fields {
        None | Some(JsonValue::Null) => Ok(FieldMap::new()),
        Some(JsonValue::Object(map)) => Ok(map),
        Some(other) => Err(SyncCacheError::MalformedEvent(format!(
            "fields for {} must be an object, got {}",
            key,
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
