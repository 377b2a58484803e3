//! Identities used throughout a search: entity keys, source references and
//! configuration fingerprints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Key addressing an entity (grid, artifact) in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity and content checksum of the dataset a search trains against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub key: Key,
    pub checksum: u64,
}

impl SourceRef {
    pub fn new(key: impl Into<Key>, checksum: u64) -> Self {
        Self {
            key: key.into(),
            checksum,
        }
    }
}

/// Deterministic checksum over the effective content of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the canonical JSON form of `value`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_value(value)?;
        Ok(Self::of_json(&json))
    }

    pub fn of_json(value: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(value).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is plenty for logs.
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Render JSON with object keys sorted, independent of map implementation.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"y": 1, "x": [2, {"d": 1, "c": 2}]}, "a": "s"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s","b":{"x":[2,{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let left = Fingerprint::of_json(&json!({"a": 1, "b": 2.5}));
        let right = Fingerprint::of_json(&json!({"b": 2.5, "a": 1}));
        assert_eq!(left, right);
        assert_eq!(left.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_distinguishes_values() {
        let one = Fingerprint::of_json(&json!({"a": 1}));
        let two = Fingerprint::of_json(&json!({"a": 2}));
        assert_ne!(one, two);
    }

    #[test]
    fn key_display_and_conversions() {
        let key: Key = "Search_gbm".into();
        assert_eq!(key.to_string(), "Search_gbm");
        assert_eq!(Key::from(String::from("x")).as_str(), "x");
    }
}
