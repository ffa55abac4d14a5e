//! Command payloads and their structural shapes.
//!
//! The device speaks small JSON objects with no published schema. A
//! [`Payload`] is a key-ordered map of top-level fields; its
//! [`CommandShape`] is the sorted set of field names with values ignored,
//! which is the grouping key used throughout discovery.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator keys in priority order.
pub const DISCRIMINATOR_KEYS: [&str; 3] = ["cmd", "action", "request"];

/// A key-ordered JSON object exchanged with the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a payload from a JSON value. Only objects qualify.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        }
    }

    /// Decode a payload from raw bytes.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Value>(raw)
            .ok()
            .and_then(Self::from_value)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Field names in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural fingerprint of this payload.
    pub fn shape(&self) -> CommandShape {
        CommandShape(self.0.keys().cloned().collect())
    }

    /// Return a copy with `overrides` applied on top. Override keys win.
    pub fn merged(&self, overrides: &Payload) -> Payload {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// The first discriminator key present, with its value.
    pub fn discriminator(&self) -> Option<(&'static str, &Value)> {
        DISCRIMINATOR_KEYS
            .iter()
            .find_map(|key| self.0.get(*key).map(|value| (*key, value)))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect::<Map<String, Value>>())
    }

    /// Serialize to compact JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Maps of `Value` always serialize.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Sorted set of top-level field names of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandShape(Vec<String>);

impl CommandShape {
    /// Build a shape from arbitrary field names. Duplicates collapse.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = fields.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self(names)
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.binary_search_by(|f| f.as_str().cmp(field)).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CommandShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.join(","))
    }
}

/// Render a JSON value as an identifier fragment.
pub fn value_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_ignores_values() {
        let a = Payload::from_value(json!({"cmd": "get_status"})).unwrap();
        let b = Payload::from_value(json!({"cmd": "get_temperature"})).unwrap();
        assert_eq!(a.shape(), b.shape());

        let c = Payload::from_value(json!({"cmd": "fan_control", "state": "query"})).unwrap();
        assert_ne!(a.shape(), c.shape());
        assert_eq!(c.shape().to_string(), "{cmd,state}");
    }

    #[test]
    fn test_non_object_is_not_a_payload() {
        assert!(Payload::from_value(json!([1, 2, 3])).is_none());
        assert!(Payload::parse(b"not json").is_none());
        assert!(Payload::parse(br#"{"status":"ready"}"#).is_some());
    }

    #[test]
    fn test_merge_overrides_win() {
        let template = Payload::new().with("cmd", "fan_control").with("state", "query");
        let overrides = Payload::new().with("state", "on");
        let merged = template.merged(&overrides);
        assert_eq!(merged.get("state"), Some(&json!("on")));
        assert_eq!(merged.get("cmd"), Some(&json!("fan_control")));
        // template untouched
        assert_eq!(template.get("state"), Some(&json!("query")));
    }

    #[test]
    fn test_discriminator_priority() {
        let p = Payload::new().with("request", "x").with("action", "y");
        assert_eq!(p.discriminator().map(|(k, _)| k), Some("action"));

        let p = Payload::new().with("id", 1);
        assert!(p.discriminator().is_none());
    }

    #[test]
    fn test_from_fields_sorts_and_dedups() {
        let shape = CommandShape::from_fields(["state", "cmd", "state"]);
        assert_eq!(shape.fields(), &["cmd".to_string(), "state".to_string()]);
        assert!(shape.contains("cmd"));
        assert!(!shape.contains("id"));
    }
}
