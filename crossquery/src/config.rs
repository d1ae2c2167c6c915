// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query request options and presets

use serde::{Deserialize, Serialize};

use crate::routing::{FeedRange, PartitionKey};

/// Default page size requested from each range
pub const DEFAULT_MAX_ITEM_COUNT: usize = 1000;

/// Default number of items the fan-out may hold before it stops prefetching
pub const DEFAULT_MAX_BUFFERED_ITEM_COUNT: usize = 1000;

/// Default upper bound of a plan cached inside a continuation token (bytes)
pub const DEFAULT_MAX_CACHED_PLAN_BYTES: usize = 16 * 1024;

/// Caller-facing options of one query
///
/// Numeric bounds follow the usual client conventions: `None` picks the
/// default and a negative value means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequestOptions {
    /// Concurrent page requests issued by the fan-out (0 = one at a time)
    pub max_concurrency: Option<i64>,

    /// Page size requested from the backend
    pub max_item_count: Option<i64>,

    /// Items the fan-out may buffer ahead of the caller
    pub max_buffered_item_count: Option<i64>,

    /// Restrict the query to one logical partition
    pub partition_key: Option<PartitionKey>,

    /// Restrict the query to one physical partition
    pub partition_key_range_id: Option<String>,

    /// Restrict the query to a slice of the container
    pub feed_range: Option<FeedRange>,

    /// Effective partition key passed as a request property
    pub effective_partition_key: Option<String>,

    /// Emit pages ordered by range instead of by arrival
    pub deterministic_ordering: bool,

    /// Run single-range queries directly against that range
    pub enable_optimistic_direct_execution: bool,

    /// Let the gateway run the whole query when the client supports it
    pub enable_distributed_gateway: bool,

    /// Skip plan retrieval and concatenate per-range results
    pub force_passthrough: bool,

    /// Plans larger than this are not cached in continuation tokens
    pub max_cached_plan_bytes: usize,
}

impl Default for QueryRequestOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            max_item_count: None,
            max_buffered_item_count: None,
            partition_key: None,
            partition_key_range_id: None,
            feed_range: None,
            effective_partition_key: None,
            deterministic_ordering: true,
            enable_optimistic_direct_execution: true,
            enable_distributed_gateway: false,
            force_passthrough: false,
            max_cached_plan_bytes: DEFAULT_MAX_CACHED_PLAN_BYTES,
        }
    }
}

impl QueryRequestOptions {
    /// Fan out to every range at once and buffer generously
    pub fn low_latency() -> Self {
        Self {
            max_concurrency: Some(-1),
            max_buffered_item_count: Some(-1),
            deterministic_ordering: false,
            ..Self::default()
        }
    }

    /// One request at a time with small pages
    pub fn memory_constrained() -> Self {
        Self {
            max_concurrency: Some(0),
            max_item_count: Some(100),
            max_buffered_item_count: Some(100),
            max_cached_plan_bytes: 4 * 1024,
            ..Self::default()
        }
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<PartitionKey>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_max_item_count(mut self, max_item_count: i64) -> Self {
        self.max_item_count = Some(max_item_count);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: i64) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), String> {
        if self.max_item_count == Some(0) {
            return Err("max_item_count must be non-zero".to_string());
        }

        let targets = [
            self.partition_key.is_some(),
            self.partition_key_range_id.is_some(),
            self.feed_range.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if targets > 1 && self.partition_key_range_id.is_some() {
            return Err(
                "partition_key_range_id cannot be combined with another target".to_string(),
            );
        }

        if let Some(epk) = &self.effective_partition_key {
            if !epk.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()) {
                return Err(format!(
                    "effective partition key '{}' is not uppercase hex",
                    epk
                ));
            }
        }

        Ok(())
    }
}

/// Normalise a caller bound: `None` → `default`, negative → unbounded
pub fn normalize_bound(value: Option<i64>, default: usize) -> usize {
    match value {
        None => default,
        Some(v) if v < 0 => usize::MAX,
        Some(v) => usize::try_from(v).unwrap_or(usize::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = QueryRequestOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.deterministic_ordering);
        assert!(options.enable_optimistic_direct_execution);
        assert!(!options.force_passthrough);
        assert!(QueryRequestOptions::low_latency().validate().is_ok());
        assert!(QueryRequestOptions::memory_constrained().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let zero_page = QueryRequestOptions::default().with_max_item_count(0);
        assert!(zero_page.validate().is_err());

        let conflicting = QueryRequestOptions {
            partition_key_range_id: Some("0".to_string()),
            ..QueryRequestOptions::default().with_partition_key("a")
        };
        assert!(conflicting.validate().is_err());

        let lower_hex = QueryRequestOptions {
            effective_partition_key: Some("abc".to_string()),
            ..QueryRequestOptions::default()
        };
        assert!(lower_hex.validate().is_err());
    }

    #[test]
    fn test_normalize_bound() {
        assert_eq!(normalize_bound(None, 1000), 1000);
        assert_eq!(normalize_bound(Some(-1), 1000), usize::MAX);
        assert_eq!(normalize_bound(Some(0), 1000), 0);
        assert_eq!(normalize_bound(Some(25), 1000), 25);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: QueryRequestOptions =
            serde_json::from_str(r#"{"max_item_count": 10, "partition_key": "tenant-1"}"#)
                .unwrap();
        assert_eq!(options.max_item_count, Some(10));
        assert_eq!(options.partition_key, Some(PartitionKey::from("tenant-1")));
        assert!(options.deterministic_ordering);
    }
}
