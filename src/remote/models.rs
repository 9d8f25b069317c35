// ABOUTME: Remote billing objects as returned by the provider API
// ABOUTME: Objects stay schemaless JSON; list pages and events get typed envelopes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One provider object (customer, card, charge, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObject(Map<String, Value>);

/// Result of walking a dotted field path through an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    Missing,
}

impl RemoteObject {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// `None` unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    /// The provider's `object` type tag (`"card"`, `"line_item"`, ...).
    pub fn object_type(&self) -> Option<&str> {
        self.str_field("object")
    }

    /// Deleted objects come back as `{"id": ..., "deleted": true}`.
    pub fn is_deleted(&self) -> bool {
        self.0.get("deleted").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Walk a dotted path (`shipping.address.city`). Every segment must be
    /// present; an intermediate that is not an object ends the walk as missing.
    pub fn lookup(&self, path: &str) -> Lookup<'_> {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return Lookup::Missing;
        };
        let Some(mut current) = self.0.get(first) else {
            return Lookup::Missing;
        };
        for segment in segments {
            match current.as_object().and_then(|map| map.get(segment)) {
                Some(next) => current = next,
                None => return Lookup::Missing,
            }
        }
        Lookup::Found(current)
    }

    /// The object's metadata map with every value rendered as a string.
    /// An absent or null map reads as empty.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let Some(Value::Object(map)) = self.0.get("metadata") else {
            return BTreeMap::new();
        };
        map.iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// An inlined list (`{"object": "list", "data": [...], "has_more": ...}`).
    pub fn embedded_list(&self, field: &str) -> Option<ListPage> {
        let value = self.0.get(field)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// An inlined single object; null or absent reads as `None`.
    pub fn embedded_object(&self, field: &str) -> Option<RemoteObject> {
        match self.0.get(field) {
            Some(Value::Object(map)) => Some(RemoteObject(map.clone())),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for RemoteObject {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub data: Vec<RemoteObject>,
    #[serde(default)]
    pub has_more: bool,
}

impl ListPage {
    pub fn last_id(&self) -> Option<&str> {
        self.data.last().and_then(RemoteObject::id)
    }
}

/// A provider notification, as re-fetched from the events endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: RemoteObject,
}
