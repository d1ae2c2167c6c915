// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CrossQuery - client-side cross-partition query execution
//!
//! Runs a SQL-like query against a container whose documents are spread
//! over many physical partitions. The backend executes the query on each
//! partition; this crate picks an execution strategy, fans requests out,
//! merges and post-processes the results, and emits pages with resumable
//! continuation tokens.
//!
//! # Features
//!
//! - **Strategy selection**: optimistic direct execution, passthrough
//!   fan-out, specialized operator pipelines or the distributed gateway
//! - **Operators**: ORDER BY merge, DISTINCT, GROUP BY, aggregates,
//!   OFFSET and TOP/LIMIT composed over any source
//! - **Resumable pages**: versioned continuation tokens that survive
//!   partition splits and merges
//! - **Stale routing recovery**: one routing refresh and rebuild when the
//!   backend reports a stale name cache
//!
//! # Usage
//!
//! Implement [`QueryClient`], [`DocumentSource`] and [`QueryPlanRetriever`]
//! for a backend, or use the [`InMemoryContainer`] that ships with the
//! crate, then drive a [`CrossPartitionQuery`] page by page.

pub mod cancel;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod exec;
pub mod memory;
pub mod page;
pub mod pipeline;
pub mod plan;
pub mod routing;
pub mod token;

pub use cancel::CancellationToken;
pub use client::{
    BackendPage, DocumentSource, GatewayQueryRequest, PartitionQueryRequest, PlanSource,
    QueryClient, QueryPlanRetriever,
};
pub use config::QueryRequestOptions;
pub use coordinator::{CrossPartitionQuery, QueryResponse, QueryTarget};
pub use error::{GoneSubStatus, QueryError, QueryResult, TokenError};
pub use exec::{InputParameters, PipelineKind};
pub use memory::{InMemoryContainer, ScanEngine, ServerQueryEngine};
pub use page::{QueryPage, QueryState};
pub use plan::{
    AggregateOperator, ContainerQueryProperties, DistinctType, GroupByAlias,
    PartitionedQueryExecutionInfo, QueryInfo, SortOrder, SqlParameter, SqlQuerySpec,
};
pub use routing::{FeedRange, PartitionKey, PartitionKeyRange, Range};

/// CrossQuery version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CrossQuery crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
