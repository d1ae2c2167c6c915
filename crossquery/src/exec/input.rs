// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Resolved parameters of one query call

use serde_json::Value;

use crate::config::{
    normalize_bound, QueryRequestOptions, DEFAULT_MAX_BUFFERED_ITEM_COUNT, DEFAULT_MAX_ITEM_COUNT,
};
use crate::error::{QueryError, QueryResult};
use crate::pipeline::FanOutSettings;
use crate::plan::{PartitionedQueryExecutionInfo, SqlQuerySpec};
use crate::routing::{FeedRange, PartitionKey, TargetScope};

/// Immutable inputs threaded through pipeline selection
///
/// Derived copies are made with the `with_*` methods; a value is never
/// changed once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParameters {
    pub query: SqlQuerySpec,
    /// Continuation as handed back by the caller, already parsed as JSON
    pub continuation: Option<Value>,
    pub feed_range: Option<FeedRange>,
    pub partition_key_range_id: Option<String>,
    /// 0 issues one request at a time
    pub max_concurrency: usize,
    pub max_item_count: usize,
    pub max_buffered_item_count: usize,
    pub partition_key: Option<PartitionKey>,
    /// Effective partition key request property
    pub effective_partition_key: Option<String>,
    pub query_plan: Option<PartitionedQueryExecutionInfo>,
    pub deterministic_ordering: bool,
    pub enable_optimistic_direct_execution: bool,
    pub enable_distributed_gateway: bool,
    pub force_passthrough: bool,
    pub max_cached_plan_bytes: usize,
}

impl InputParameters {
    /// Validate `options` and resolve their bounds
    pub fn new(query: SqlQuerySpec, options: &QueryRequestOptions) -> QueryResult<Self> {
        options.validate().map_err(QueryError::InvalidConfiguration)?;

        Ok(Self {
            query,
            continuation: None,
            feed_range: options.feed_range.clone(),
            partition_key_range_id: options.partition_key_range_id.clone(),
            max_concurrency: normalize_bound(options.max_concurrency, 0),
            max_item_count: normalize_bound(options.max_item_count, DEFAULT_MAX_ITEM_COUNT),
            max_buffered_item_count: normalize_bound(
                options.max_buffered_item_count,
                DEFAULT_MAX_BUFFERED_ITEM_COUNT,
            ),
            partition_key: options.partition_key.clone(),
            effective_partition_key: options.effective_partition_key.clone(),
            query_plan: None,
            deterministic_ordering: options.deterministic_ordering,
            enable_optimistic_direct_execution: options.enable_optimistic_direct_execution,
            enable_distributed_gateway: options.enable_distributed_gateway,
            force_passthrough: options.force_passthrough,
            max_cached_plan_bytes: options.max_cached_plan_bytes,
        })
    }

    pub fn with_continuation_token(&self, continuation: Option<Value>) -> Self {
        Self {
            continuation: continuation.filter(|value| !value.is_null()),
            ..self.clone()
        }
    }

    pub fn with_query(&self, query: SqlQuerySpec) -> Self {
        Self {
            query,
            ..self.clone()
        }
    }

    pub fn with_query_plan(&self, plan: PartitionedQueryExecutionInfo) -> Self {
        Self {
            query_plan: Some(plan),
            ..self.clone()
        }
    }

    /// Targeting information for range resolution
    pub fn target_scope(&self) -> TargetScope {
        TargetScope {
            partition_key_range_id: self.partition_key_range_id.clone(),
            partition_key: self.partition_key.clone(),
            effective_partition_key: self.effective_partition_key.clone(),
            feed_range: self.feed_range.clone(),
            query_ranges: Vec::new(),
        }
    }

    pub fn fan_out_settings(&self) -> FanOutSettings {
        FanOutSettings {
            page_size: self.max_item_count,
            initial_page_size: None,
            max_concurrency: self.max_concurrency,
            max_buffered_item_count: self.max_buffered_item_count,
        }
    }
}
