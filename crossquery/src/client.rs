// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collaborators consumed by the query engine
//!
//! The transport, the routing map cache and the plan service all live behind
//! these traits. The engine only reads through them and asks for a forced
//! refresh when it detects staleness.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::plan::{ContainerQueryProperties, PartitionedQueryExecutionInfo, SqlQuerySpec};
use crate::routing::{PartitionKey, PartitionKeyRange, Range};

/// Container metadata and routing map access
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Cached container properties, with the effective partition key of
    /// `partition_key` filled in when one is given
    async fn get_cached_container_properties(
        &self,
        resource_link: &str,
        partition_key: Option<&PartitionKey>,
    ) -> QueryResult<ContainerQueryProperties>;

    /// Live partition key ranges overlapping any of `ranges`, sorted by min key
    async fn get_target_partition_key_ranges(
        &self,
        resource_link: &str,
        collection_resource_id: &str,
        ranges: &[Range],
        force_refresh: bool,
    ) -> QueryResult<Vec<PartitionKeyRange>>;

    async fn get_partition_key_range_by_id(
        &self,
        resource_link: &str,
        collection_resource_id: &str,
        partition_key_range_id: &str,
        force_refresh: bool,
    ) -> QueryResult<Option<PartitionKeyRange>>;

    /// Drop cached collection metadata so the next lookup hits the backend
    async fn force_refresh_collection_cache(&self, resource_link: &str) -> QueryResult<()>;

    /// The local interop parser is unavailable; plans must come from the gateway
    fn bypass_query_parsing(&self) -> bool;

    /// The account has opted out of optimistic direct execution
    fn client_disable_optimistic_direct_execution(&self) -> bool;

    /// The gateway can run whole queries on the client's behalf
    fn supports_distributed_gateway(&self) -> bool {
        false
    }
}

/// One page request against one key range
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionQueryRequest {
    pub query: SqlQuerySpec,
    pub feed_range: Range,
    pub partition_key: Option<PartitionKey>,
    /// Backend continuation; `None` starts from the beginning of the range
    pub continuation: Option<String>,
    pub page_size: usize,
    /// The range holds the entire result; the backend applies every operator
    /// of the query instead of returning rows shaped for client-side merging
    pub whole_query: bool,
}

/// A whole-query page request served by the distributed gateway
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayQueryRequest {
    pub resource_link: String,
    pub query: SqlQuerySpec,
    pub partition_key: Option<PartitionKey>,
    pub continuation: Option<String>,
    pub page_size: usize,
}

/// A raw page as returned by the backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendPage {
    pub documents: Vec<Value>,
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub activity_id: Option<String>,
    pub response_length_bytes: usize,
    pub diagnostics: Option<String>,
}

/// Transport-agnostic page supplier
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn query_page(&self, request: PartitionQueryRequest) -> QueryResult<BackendPage>;

    async fn query_gateway(&self, _request: GatewayQueryRequest) -> QueryResult<BackendPage> {
        Err(QueryError::Unsupported(
            "distributed gateway execution".to_string(),
        ))
    }
}

/// Where a query plan is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// Local interop parser, no network round trip
    Interop,
    /// Round trip to the gateway
    Gateway,
}

/// Obtains the server-computed execution plan of a query
#[async_trait]
pub trait QueryPlanRetriever: Send + Sync {
    async fn get_query_plan(
        &self,
        query: &SqlQuerySpec,
        properties: &ContainerQueryProperties,
        has_partition_key: bool,
        source: PlanSource,
    ) -> QueryResult<PartitionedQueryExecutionInfo>;
}
