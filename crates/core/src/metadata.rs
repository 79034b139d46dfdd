//! Message metadata: an immutable, ordered key/value map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Immutable metadata attached to a message.
///
/// Values are JSON values so metadata survives serialization unchanged. All
/// "mutating" operations return a new instance; the original is never changed.
/// Cloning is cheap (shared map).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaData {
    entries: Arc<BTreeMap<String, JsonValue>>,
}

impl MetaData {
    /// The empty metadata instance.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(entries: BTreeMap<String, JsonValue>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Metadata containing a single entry.
    pub fn with(key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(key.into(), value.into());
        Self::from_map(entries)
    }

    /// A copy of this metadata with `key` set to `value`.
    pub fn and(&self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value.into());
        Self::from_map(entries)
    }

    /// A copy of this metadata with all entries of `other` added (other wins).
    pub fn merged_with(&self, other: &MetaData) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        for (k, v) in other.iter() {
            entries.insert(k.clone(), v.clone());
        }
        Self::from_map(entries)
    }

    /// A copy of this metadata without the given keys.
    pub fn without<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entries = (*self.entries).clone();
        for key in keys {
            entries.remove(key);
        }
        Self::from_map(entries)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.entries.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, JsonValue> {
        &self.entries
    }
}

impl FromIterator<(String, JsonValue)> for MetaData {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl Serialize for MetaData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetaData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::deserialize(deserializer).map(Self::from_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn and_returns_new_instance_leaving_original_untouched() {
        let original = MetaData::with("user", "alice");
        let extended = original.and("trace", 42);

        assert_eq!(original.len(), 1);
        assert_eq!(extended.len(), 2);
        assert_eq!(extended.get("trace"), Some(&json!(42)));
    }

    #[test]
    fn merged_with_prefers_other_values() {
        let left = MetaData::with("k", "left").and("only_left", true);
        let right = MetaData::with("k", "right");

        let merged = left.merged_with(&right);
        assert_eq!(merged.get("k"), Some(&json!("right")));
        assert!(merged.contains_key("only_left"));
    }

    #[test]
    fn serializes_as_plain_json_object() {
        let meta = MetaData::with("a", 1).and("b", "two");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({"a": 1, "b": "two"}));

        let back: MetaData = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }
}
