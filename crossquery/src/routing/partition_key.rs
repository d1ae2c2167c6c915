// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Logical partition keys and their effective partition key hashes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical partition key value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub Value);

impl PartitionKey {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Hash the key into the effective partition key space
    ///
    /// The result is eight uppercase hex digits whose leading byte is kept
    /// below `FF`, so every key sorts strictly under `MAX_EXCLUSIVE`.
    pub fn effective_partition_key(&self) -> String {
        let canonical = canonical_json(&self.0);
        let hash = crc32fast::hash(canonical.as_bytes());
        let leading = (hash >> 24) % 0xFF;
        format!("{:02X}{:06X}", leading, hash & 0x00FF_FFFF)
    }

    /// Read the key out of a document given a path like `/pk` or `/address/city`
    pub fn from_document(document: &Value, path: &str) -> Option<Self> {
        let mut current = document;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.get(segment)?;
        }
        Some(Self(current.clone()))
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

/// Deterministic JSON text: object keys sorted and numbers normalised to f64
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format!("{}", f),
            None => n.to_string(),
        },
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::range::MAX_EXCLUSIVE;
    use serde_json::json;

    #[test]
    fn test_effective_partition_key_is_stable() {
        let a = PartitionKey::from("tenant-1");
        let b = PartitionKey::from("tenant-1");
        assert_eq!(a.effective_partition_key(), b.effective_partition_key());
        assert_eq!(a.effective_partition_key().len(), 8);
    }

    #[test]
    fn test_effective_partition_keys_sort_below_max() {
        for i in 0..500 {
            let key = PartitionKey::new(json!(format!("key-{}", i)));
            assert!(key.effective_partition_key().as_str() < MAX_EXCLUSIVE);
        }
    }

    #[test]
    fn test_numbers_hash_equal_regardless_of_representation() {
        let int = PartitionKey::new(json!(1));
        let float = PartitionKey::new(json!(1.0));
        assert_eq!(int.effective_partition_key(), float.effective_partition_key());
    }

    #[test]
    fn test_from_document_path() {
        let doc = json!({"id": "1", "address": {"city": "Oslo"}});
        let key = PartitionKey::from_document(&doc, "/address/city").unwrap();
        assert_eq!(key.value(), &json!("Oslo"));
        assert!(PartitionKey::from_document(&doc, "/missing").is_none());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": [true, null]});
        assert_eq!(canonical_json(&a), r#"{"a":[true,null],"b":1}"#);
    }
}
