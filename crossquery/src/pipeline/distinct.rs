// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! DISTINCT
//!
//! Results are compared by the SHA-256 of their canonical JSON text. Ordered
//! distinct only has to remember the previous result; unordered distinct
//! keeps every hash it has seen, and carries them in its continuation.

use std::collections::HashSet;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::QueryState;
use crate::plan::DistinctType;
use crate::routing::canonical_json;

use super::{take_produced, PageSlot, PipelineStage};

const MAP_PROPERTY: &str = "distinctMapToken";
const SOURCE_TOKEN_PROPERTY: &str = "sourceToken";

/// Hex SHA-256 of a value's canonical form
pub fn value_hash(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Hashes remembered across pages
#[derive(Debug, Clone, PartialEq)]
pub enum DistinctMap {
    Ordered(Option<String>),
    Unordered(HashSet<String>),
}

impl DistinctMap {
    pub fn new(kind: DistinctType) -> QueryResult<Self> {
        match kind {
            DistinctType::Ordered => Ok(DistinctMap::Ordered(None)),
            DistinctType::Unordered => Ok(DistinctMap::Unordered(HashSet::new())),
            DistinctType::None => Err(QueryError::internal(
                "distinct stage requested for a query without DISTINCT",
            )),
        }
    }

    /// Record a value; `true` when it was not seen before
    pub fn add(&mut self, value: &Value) -> bool {
        let hash = value_hash(value);
        match self {
            DistinctMap::Ordered(last) => {
                if last.as_deref() == Some(hash.as_str()) {
                    return false;
                }
                *last = Some(hash);
                true
            }
            DistinctMap::Unordered(seen) => seen.insert(hash),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            DistinctMap::Ordered(last) => json!(last),
            DistinctMap::Unordered(seen) => {
                let mut hashes: Vec<&String> = seen.iter().collect();
                hashes.sort();
                json!(hashes)
            }
        }
    }

    fn from_value(kind: DistinctType, value: &Value) -> QueryResult<Self> {
        match kind {
            DistinctType::Ordered => match value {
                Value::Null => Ok(DistinctMap::Ordered(None)),
                Value::String(hash) => Ok(DistinctMap::Ordered(Some(hash.clone()))),
                _ => Err(QueryError::malformed_token(
                    "ordered distinct continuation must hold one hash",
                )),
            },
            DistinctType::Unordered => {
                let hashes = value.as_array().ok_or_else(|| {
                    QueryError::malformed_token("unordered distinct continuation must be an array")
                })?;
                let mut seen = HashSet::with_capacity(hashes.len());
                for hash in hashes {
                    let hash = hash.as_str().ok_or_else(|| {
                        QueryError::malformed_token("distinct hashes must be strings")
                    })?;
                    seen.insert(hash.to_string());
                }
                Ok(DistinctMap::Unordered(seen))
            }
            DistinctType::None => DistinctMap::new(kind),
        }
    }
}

pub struct DistinctStage {
    source: PipelineStage,
    map: DistinctMap,
    pub(crate) slot: PageSlot,
}

impl DistinctStage {
    pub fn peel(
        kind: DistinctType,
        continuation: Option<&Value>,
    ) -> QueryResult<(DistinctMap, Option<Value>)> {
        let Some(token) = continuation.filter(|value| !value.is_null()) else {
            return Ok((DistinctMap::new(kind)?, None));
        };
        let map = token
            .get(MAP_PROPERTY)
            .ok_or_else(|| QueryError::malformed_token("continuation is missing 'distinctMapToken'"))?;
        let source = token
            .get(SOURCE_TOKEN_PROPERTY)
            .cloned()
            .ok_or_else(|| QueryError::malformed_token("distinct continuation is missing 'sourceToken'"))?;
        Ok((DistinctMap::from_value(kind, map)?, Some(source)))
    }

    pub fn monadic_create(source: PipelineStage, map: DistinctMap) -> QueryResult<PipelineStage> {
        Ok(PipelineStage::Distinct(Box::new(Self {
            source,
            map,
            slot: PageSlot::default(),
        })))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Distinct")?;
        if !self.source.move_next(cancel).await? {
            return Ok(self.slot.finish());
        }

        match take_produced(&mut self.source) {
            Ok(mut page) => {
                let documents = std::mem::take(&mut page.documents);
                page.documents = documents
                    .into_iter()
                    .filter(|document| self.map.add(document))
                    .collect();
                page.state = page.state.take().map(|state| {
                    QueryState::new(json!({
                        MAP_PROPERTY: self.map.to_value(),
                        SOURCE_TOKEN_PROPERTY: state.into_value(),
                    }))
                });
                Ok(self.slot.set(Ok(page)))
            }
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::QueryPage;
    use crate::pipeline::basic::ScriptedStage;

    #[test]
    fn test_hash_ignores_key_order_and_number_form() {
        assert_eq!(value_hash(&json!({"a": 1, "b": 2})), value_hash(&json!({"b": 2.0, "a": 1})));
        assert_ne!(value_hash(&json!("1")), value_hash(&json!(1)));
        assert_eq!(value_hash(&json!(null)).len(), 64);
    }

    #[tokio::test]
    async fn test_unordered_distinct_across_pages() {
        let source = ScriptedStage::stage(vec![
            Ok(QueryPage::new(
                vec![json!("a"), json!("b"), json!("a")],
                Some(QueryState::new(json!("s1"))),
            )),
            Ok(QueryPage::new(vec![json!("b"), json!("c")], None)),
        ]);
        let map = DistinctMap::new(DistinctType::Unordered).unwrap();
        let mut stage = DistinctStage::monadic_create(source, map).unwrap();
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await.unwrap());
        let first = stage.take_current().unwrap().unwrap();
        assert_eq!(first.documents, vec![json!("a"), json!("b")]);
        let state = first.state.unwrap().into_value();
        assert_eq!(state["distinctMapToken"].as_array().unwrap().len(), 2);

        assert!(stage.move_next(&cancel).await.unwrap());
        let second = stage.take_current().unwrap().unwrap();
        assert_eq!(second.documents, vec![json!("c")]);
    }

    #[test]
    fn test_ordered_map_only_drops_adjacent_duplicates() {
        let mut map = DistinctMap::new(DistinctType::Ordered).unwrap();
        assert!(map.add(&json!(1)));
        assert!(!map.add(&json!(1)));
        assert!(map.add(&json!(2)));
        assert!(map.add(&json!(1)));
    }

    #[test]
    fn test_peel_restores_map() {
        let mut map = DistinctMap::new(DistinctType::Unordered).unwrap();
        map.add(&json!("x"));
        let token = json!({"distinctMapToken": map.to_value(), "sourceToken": "inner"});

        let (mut restored, source) = DistinctStage::peel(DistinctType::Unordered, Some(&token)).unwrap();
        assert_eq!(source, Some(json!("inner")));
        assert!(!restored.add(&json!("x")));

        assert!(DistinctStage::peel(DistinctType::Ordered, Some(&token))
            .unwrap_err()
            .is_malformed_token());
    }
}
