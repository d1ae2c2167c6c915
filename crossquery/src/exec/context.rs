// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared state of one query execution

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::client::{DocumentSource, QueryClient, QueryPlanRetriever};
use crate::plan::PartitionedQueryExecutionInfo;

/// Execution strategy picked for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    OptimisticDirectExecution,
    Passthrough,
    Specialized,
    DistributedGateway,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineKind::OptimisticDirectExecution => "OptimisticDirectExecution",
            PipelineKind::Passthrough => "Passthrough",
            PipelineKind::Specialized => "Specialized",
            PipelineKind::DistributedGateway => "DistributedGateway",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct ContextState {
    pipeline_kind: Option<PipelineKind>,
    query_plan: Option<PartitionedQueryExecutionInfo>,
    plan_requests: usize,
}

/// Collaborators and selection outcome of one query
pub struct QueryContext {
    pub client: Arc<dyn QueryClient>,
    pub source: Arc<dyn DocumentSource>,
    pub plan_retriever: Arc<dyn QueryPlanRetriever>,
    pub resource_link: String,
    /// Sent with every request of the query
    pub correlated_activity_id: Uuid,
    state: Mutex<ContextState>,
}

impl QueryContext {
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
            correlated_activity_id: Uuid::new_v4(),
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn record_pipeline(&self, kind: PipelineKind) {
        log::info!(
            "Query {} on {} runs as {}",
            self.correlated_activity_id,
            self.resource_link,
            kind
        );
        self.state.lock().pipeline_kind = Some(kind);
    }

    pub fn pipeline_kind(&self) -> Option<PipelineKind> {
        self.state.lock().pipeline_kind
    }

    /// Remember the plan in use so continuations can carry it
    pub fn record_plan(&self, plan: PartitionedQueryExecutionInfo) {
        self.state.lock().query_plan = Some(plan);
    }

    pub fn cached_plan(&self) -> Option<PartitionedQueryExecutionInfo> {
        self.state.lock().query_plan.clone()
    }

    pub fn note_plan_request(&self) {
        self.state.lock().plan_requests += 1;
    }

    /// Plans fetched from the retriever so far
    pub fn plan_requests(&self) -> usize {
        self.state.lock().plan_requests
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("resource_link", &self.resource_link)
            .field("correlated_activity_id", &self.correlated_activity_id)
            .field("pipeline_kind", &self.pipeline_kind())
            .finish()
    }
}
