// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Item data structures.
//!
//! An [`ExternalRecord`] is what a source client hands back: an external id,
//! a title and a free-form attribute bag. A [`StoredItem`] is the row the item
//! store keeps for it, keyed by `(external_id, api_source)`.
//!
//! # Example
//!
//! ```
//! use item_sync::{ExternalRecord, ExternalId};
//!
//! let record = ExternalRecord::new(25, "pikachu")
//!     .with_attribute("height", 4);
//!
//! assert_eq!(record.id, ExternalId::Int(25));
//! let hash = record.content_hash().unwrap();
//! assert_eq!(hash.len(), 64);
//! assert_eq!(hash, record.clone().content_hash().unwrap());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute bag carried by records (`extend_info` in storage)
pub type Attributes = Map<String, Value>;

/// Identifier assigned by the external source.
///
/// Serialized untagged, so `25` and `"jakarta"` both round-trip as written.
///
/// Storage identity is the textual [`key`](Self::key): `Int(25)` and
/// `Text("25")` name the same stored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Text(String),
}

impl ExternalId {
    /// The `external_id` column value; unique together with the source name.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ExternalId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for ExternalId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for ExternalId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// A record as returned by an external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: ExternalId,
    pub title: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ExternalRecord {
    pub fn new(id: impl Into<ExternalId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// The `description` attribute when it is a string, empty otherwise.
    #[must_use]
    pub fn description(&self) -> String {
        self.attributes
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Attributes as canonical JSON (object keys sorted at every depth).
    pub fn attributes_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&canonicalize(&Value::Object(self.attributes.clone())))
    }

    /// SHA-256 over `title:attributes_json`, lowercase hex.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        Ok(content_hash(&self.title, &self.attributes_json()?))
    }
}

/// Hex SHA-256 of `{title}:{attributes_json}`.
#[must_use]
pub fn content_hash(title: &str, attributes_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(attributes_json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild `value` with object keys inserted in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// An item as persisted by the item store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: i64,
    pub external_id: String,
    pub api_source: String,
    pub title: String,
    pub description: String,
    /// Attribute bag; only replaced when the content hash changes
    pub attributes: Attributes,
    pub content_hash: String,
    /// Upserts applied to this row, including the insert
    pub sync_attempts: u32,
    pub last_sync_error: Option<String>,
    /// Epoch millis of the latest upsert
    pub synced_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Current time as epoch millis
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_deterministic() {
        let a = ExternalRecord::new(1, "bulbasaur").with_attribute("raw_data", json!({"name": "bulbasaur"}));
        let b = a.clone();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_hash_ignores_attribute_insertion_order() {
        let a = ExternalRecord::new(1, "x")
            .with_attribute("b", 2)
            .with_attribute("a", json!({"z": 1, "y": 2}));
        let b = ExternalRecord::new(1, "x")
            .with_attribute("a", json!({"y": 2, "z": 1}))
            .with_attribute("b", 2);
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_hash_changes_with_title_or_attributes() {
        let base = ExternalRecord::new(1, "x").with_attribute("t", 20.5);
        let retitled = ExternalRecord::new(1, "y").with_attribute("t", 20.5);
        let warmer = ExternalRecord::new(1, "x").with_attribute("t", 21.0);

        let h = base.content_hash().unwrap();
        assert_ne!(h, retitled.content_hash().unwrap());
        assert_ne!(h, warmer.content_hash().unwrap());
    }

    #[test]
    fn test_hash_ignores_external_id() {
        let a = ExternalRecord::new(1, "x");
        let b = ExternalRecord::new("other", "x");
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_hash_format() {
        // sha256("x:{}")
        let expected = hex::encode(Sha256::digest(b"x:{}"));
        assert_eq!(ExternalRecord::new(1, "x").content_hash().unwrap(), expected);
    }

    #[test]
    fn test_external_id_untagged_serde() {
        let int: ExternalId = serde_json::from_value(json!(25)).unwrap();
        let text: ExternalId = serde_json::from_value(json!("jakarta")).unwrap();
        assert_eq!(int, ExternalId::Int(25));
        assert_eq!(text, ExternalId::Text("jakarta".into()));
        assert_eq!(serde_json::to_value(&int).unwrap(), json!(25));
        assert_eq!(int.to_string(), "25");
        assert_eq!(text.to_string(), "jakarta");
    }

    #[test]
    fn test_external_id_key() {
        assert_eq!(ExternalId::Int(25).key(), "25");
        assert_eq!(ExternalId::Int(25).key(), ExternalId::from("25").key());
        assert_eq!(ExternalId::from("jakarta").key(), "jakarta");
    }

    #[test]
    fn test_description_from_attributes() {
        let record = ExternalRecord::new(1, "Jakarta").with_attribute("description", "light rain");
        assert_eq!(record.description(), "light rain");
        assert_eq!(ExternalRecord::new(1, "x").description(), "");
        assert_eq!(ExternalRecord::new(1, "x").with_attribute("description", 5).description(), "");
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2024-01-01T00:00:00Z
        assert!(now_millis() > 1_704_067_200_000);
    }
}
