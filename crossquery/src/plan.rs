// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query plan model
//!
//! A plan is computed by the backend (or a local interop parser) and tells the
//! client which operators it has to run on top of the per-partition streams.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::Range;

/// Query text plus bound parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<SqlParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

impl SqlQuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Aggregate functions the client knows how to merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOperator {
    Average,
    Count,
    Max,
    Min,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctType {
    #[default]
    None,
    /// Duplicates arrive adjacent to each other (DISTINCT with ORDER BY)
    Ordered,
    Unordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Projection entry of a GROUP BY query: alias and its aggregate, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByAlias {
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateOperator>,
}

/// Client-side operators required by the query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryInfo {
    pub distinct_type: DistinctType,
    pub top: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Vec<SortOrder>,
    pub order_by_expressions: Vec<String>,
    pub group_by_expressions: Vec<String>,
    pub group_by_aliases: Vec<GroupByAlias>,
    pub aggregates: Vec<AggregateOperator>,
    /// Aliases of the aggregates in a non-VALUE projection, in select order
    pub aggregate_aliases: Vec<String>,
    pub has_select_value: bool,
    pub rewritten_query: Option<String>,
    /// ORDER BY that the backend cannot stream (vector distance ordering)
    pub has_non_streaming_order_by: bool,
    /// Hybrid (full text + vector) search ranking
    pub is_hybrid_search: bool,
}

impl QueryInfo {
    pub fn has_distinct(&self) -> bool {
        self.distinct_type != DistinctType::None
    }

    pub fn has_top(&self) -> bool {
        self.top.is_some()
    }

    pub fn has_offset(&self) -> bool {
        self.offset.is_some()
    }

    pub fn has_limit(&self) -> bool {
        self.limit.is_some()
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by_expressions.is_empty()
    }

    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
            || self
                .group_by_aliases
                .iter()
                .any(|alias| alias.aggregate.is_some())
    }

    /// No operator needs to see results from more than one partition
    pub fn is_server_streaming(&self) -> bool {
        !self.has_aggregates() && !self.has_distinct() && !self.has_group_by()
    }

    /// Per-partition streams can simply be concatenated
    pub fn is_client_streaming(&self) -> bool {
        self.is_server_streaming()
            && !self.has_order_by()
            && !self.has_top()
            && !self.has_limit()
            && !self.has_offset()
            && !self.is_hybrid_search
    }
}

/// A full plan: operators plus the key ranges the query can touch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionedQueryExecutionInfo {
    #[serde(default)]
    pub query_info: QueryInfo,
    #[serde(default)]
    pub query_ranges: Vec<Range>,
}

impl PartitionedQueryExecutionInfo {
    /// Plan of a query with no client-side operators over the whole key space
    pub fn passthrough() -> Self {
        Self {
            query_info: QueryInfo::default(),
            query_ranges: vec![Range::full()],
        }
    }

    pub fn with_query_info(mut self, query_info: QueryInfo) -> Self {
        self.query_info = query_info;
        self
    }

    pub fn with_query_ranges(mut self, ranges: Vec<Range>) -> Self {
        self.query_ranges = ranges;
        self
    }

    /// The plan pins the query to one logical partition
    pub fn targets_single_key(&self) -> bool {
        self.query_ranges.len() == 1 && self.query_ranges[0].is_single_value()
    }
}

/// Container metadata the pipeline needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerQueryProperties {
    pub resource_id: String,
    pub partition_key_paths: Vec<String>,
    /// Effective partition key of the partition key supplied with the request
    #[serde(default)]
    pub effective_partition_key_string: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_classification() {
        let plain = QueryInfo::default();
        assert!(plain.is_server_streaming());
        assert!(plain.is_client_streaming());

        let top = QueryInfo {
            top: Some(10),
            ..QueryInfo::default()
        };
        assert!(top.is_server_streaming());
        assert!(!top.is_client_streaming());

        let count = QueryInfo {
            aggregates: vec![AggregateOperator::Count],
            has_select_value: true,
            ..QueryInfo::default()
        };
        assert!(!count.is_server_streaming());

        let grouped = QueryInfo {
            group_by_expressions: vec!["c.team".to_string()],
            group_by_aliases: vec![GroupByAlias {
                alias: "team".to_string(),
                aggregate: None,
            }],
            ..QueryInfo::default()
        };
        assert!(grouped.has_group_by());
        assert!(!grouped.is_server_streaming());
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: PartitionedQueryExecutionInfo = serde_json::from_value(serde_json::json!({
            "queryInfo": {"top": 5, "orderBy": ["Descending"]},
            "queryRanges": [{"min": "", "max": "FF"}]
        }))
        .unwrap();

        assert_eq!(plan.query_info.top, Some(5));
        assert_eq!(plan.query_info.order_by, vec![SortOrder::Descending]);
        assert_eq!(plan.query_ranges, vec![Range::full()]);
        assert!(!plan.targets_single_key());
    }
}
