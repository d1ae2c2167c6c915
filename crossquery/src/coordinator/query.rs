// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cross-partition query driver
//!
//! Owns the pipeline of one query call and turns the pages it produces into
//! caller-facing responses with opaque continuation strings.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::client::{DocumentSource, QueryClient, QueryPlanRetriever};
use crate::config::QueryRequestOptions;
use crate::error::{QueryError, QueryResult};
use crate::exec::{ExecutionContextFactory, InputParameters, PipelineKind, QueryContext};
use crate::page::QueryPage;
use crate::pipeline::PipelineStage;
use crate::plan::{PartitionedQueryExecutionInfo, SqlQuerySpec};
use crate::token::{parse_continuation, PipelineContinuationToken};

/// One page of results as handed to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub documents: Vec<Value>,
    /// Resume point; `None` once the query is drained
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub activity_id: Option<String>,
    pub correlated_activity_id: Uuid,
    pub response_length_bytes: usize,
    pub diagnostics: Option<String>,
    pub disallow_continuation_reason: Option<String>,
}

/// Collaborators of a container, as the engine consumes them
#[derive(Clone)]
pub struct QueryTarget {
    pub client: Arc<dyn QueryClient>,
    pub source: Arc<dyn DocumentSource>,
    pub plan_retriever: Arc<dyn QueryPlanRetriever>,
    pub resource_link: String,
}

impl QueryTarget {
    pub fn new(
        client: Arc<dyn QueryClient>,
        source: Arc<dyn DocumentSource>,
        plan_retriever: Arc<dyn QueryPlanRetriever>,
        resource_link: impl Into<String>,
    ) -> Self {
        Self {
            client,
            source,
            plan_retriever,
            resource_link: resource_link.into(),
        }
    }
}

/// Entry point for running a query across the partitions of a container
///
/// # Example
/// ```no_run
/// # async fn run(target: crossquery::QueryTarget) -> crossquery::QueryResult<()> {
/// use crossquery::{CrossPartitionQuery, QueryRequestOptions, SqlQuerySpec};
///
/// let mut query = CrossPartitionQuery::new(
///     target,
///     SqlQuerySpec::new("SELECT * FROM c"),
///     None,
///     &QueryRequestOptions::default(),
/// )?;
/// while let Some(page) = query.read_next().await? {
///     println!("{} documents", page.documents.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct CrossPartitionQuery {
    pipeline: PipelineStage,
    context: Arc<QueryContext>,
    cancel: CancellationToken,
    max_cached_plan_bytes: usize,
    has_more_results: bool,
}

impl CrossPartitionQuery {
    /// Prepare a query; no request is sent until the first `read_next`
    ///
    /// A continuation that is not valid JSON is rejected here.
    pub fn new(
        target: QueryTarget,
        query: SqlQuerySpec,
        continuation: Option<&str>,
        options: &QueryRequestOptions,
    ) -> QueryResult<Self> {
        let input = Self::input(query, continuation, options)?;
        Ok(Self::from_input(target, input))
    }

    /// Prepare a query whose plan the caller already holds
    pub fn with_plan(
        target: QueryTarget,
        query: SqlQuerySpec,
        plan: PartitionedQueryExecutionInfo,
        continuation: Option<&str>,
        options: &QueryRequestOptions,
    ) -> QueryResult<Self> {
        let input = Self::input(query, continuation, options)?.with_query_plan(plan);
        Ok(Self::from_input(target, input))
    }

    fn input(
        query: SqlQuerySpec,
        continuation: Option<&str>,
        options: &QueryRequestOptions,
    ) -> QueryResult<InputParameters> {
        let continuation = continuation
            .filter(|text| !text.trim().is_empty())
            .map(parse_continuation)
            .transpose()?;
        Ok(InputParameters::new(query, options)?.with_continuation_token(continuation))
    }

    pub fn from_input(target: QueryTarget, input: InputParameters) -> Self {
        let context = Arc::new(QueryContext::new(
            target.client,
            target.source,
            target.plan_retriever,
            target.resource_link,
        ));
        let max_cached_plan_bytes = input.max_cached_plan_bytes;
        Self {
            pipeline: ExecutionContextFactory::create(input, context.clone()),
            context,
            cancel: CancellationToken::new(),
            max_cached_plan_bytes,
            has_more_results: true,
        }
    }

    pub fn has_more_results(&self) -> bool {
        self.has_more_results
    }

    /// Signal that cancels every in-flight and future read of this query
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Strategy chosen for the query; known after the first read
    pub fn selected_pipeline(&self) -> Option<PipelineKind> {
        self.context.pipeline_kind()
    }

    /// Plans fetched from the plan retriever by this query
    pub fn plan_requests(&self) -> usize {
        self.context.plan_requests()
    }

    pub fn correlated_activity_id(&self) -> Uuid {
        self.context.correlated_activity_id
    }

    /// Read the next page
    ///
    /// `Ok(None)` once the query is drained. A failed page is returned as
    /// `Err`; the query may be read again afterwards, which retries the same
    /// position.
    pub async fn read_next(&mut self) -> QueryResult<Option<QueryResponse>> {
        if !self.has_more_results {
            return Ok(None);
        }
        if !self.pipeline.move_next(&self.cancel).await? {
            self.has_more_results = false;
            return Ok(None);
        }
        let page = self.pipeline.take_current().ok_or_else(|| {
            QueryError::internal("pipeline advanced without producing a page")
        })??;

        self.has_more_results = page.state.is_some();
        Ok(Some(self.respond(page)))
    }

    /// Read every remaining page and concatenate the documents
    pub async fn read_all(&mut self) -> QueryResult<Vec<Value>> {
        let mut documents = Vec::new();
        while let Some(page) = self.read_next().await? {
            documents.extend(page.documents);
        }
        Ok(documents)
    }

    fn respond(&self, page: QueryPage) -> QueryResponse {
        let continuation = page.state.map(|state| {
            let plan = self
                .context
                .cached_plan()
                .filter(|plan| self.plan_fits(plan));
            PipelineContinuationToken::latest(state.into_value(), plan)
                .encode()
                .to_string()
        });

        QueryResponse {
            documents: page.documents,
            continuation,
            request_charge: page.request_charge,
            activity_id: page.activity_id,
            correlated_activity_id: self.context.correlated_activity_id,
            response_length_bytes: page.response_length_bytes,
            diagnostics: page.diagnostics,
            disallow_continuation_reason: page.disallow_continuation_reason,
        }
    }

    fn plan_fits(&self, plan: &PartitionedQueryExecutionInfo) -> bool {
        match serde_json::to_vec(plan) {
            Ok(bytes) => bytes.len() <= self.max_cached_plan_bytes,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CrossPartitionQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossPartitionQuery")
            .field("pipeline", &self.pipeline)
            .field("context", &self.context)
            .field("has_more_results", &self.has_more_results)
            .finish()
    }
}
