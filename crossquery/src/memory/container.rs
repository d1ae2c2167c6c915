// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! A partitioned container held in memory
//!
//! Implements every collaborator the engine consumes. Partitions split and
//! merge on request; the routing map handed to clients is a snapshot that
//! only catches up on a forced refresh, so clients observe the same
//! staleness they would against a live service.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::{
    BackendPage, DocumentSource, GatewayQueryRequest, PartitionQueryRequest, PlanSource,
    QueryClient, QueryPlanRetriever,
};
use crate::error::{GoneSubStatus, QueryError, QueryResult};
use crate::pipeline::ordering::compare_order_by;
use crate::plan::{ContainerQueryProperties, PartitionedQueryExecutionInfo, SqlQuerySpec};
use crate::routing::{PartitionKey, PartitionKeyRange, Range, MAX_EXCLUSIVE, MIN_INCLUSIVE};

use super::engine::{ScanEngine, ServerQueryEngine, ServerResult, ServerRow, StoredDocument};

/// Numeric value of `MAX_EXCLUSIVE` in the 8-digit boundary space
const MAX_BOUNDARY: u64 = 0xFF00_0000;

fn boundary_value(boundary: &str) -> QueryResult<u64> {
    match boundary {
        MIN_INCLUSIVE => Ok(0),
        MAX_EXCLUSIVE => Ok(MAX_BOUNDARY),
        other => u64::from_str_radix(other, 16)
            .map_err(|_| QueryError::internal(format!("invalid range boundary '{}'", other))),
    }
}

fn boundary_text(value: u64) -> String {
    match value {
        0 => MIN_INCLUSIVE.to_string(),
        MAX_BOUNDARY => MAX_EXCLUSIVE.to_string(),
        other => format!("{:08X}", other),
    }
}

/// Backend continuation: position of the last returned row
fn encode_position(row: &ServerRow) -> String {
    json!({ "items": row.order_by_items, "rid": row.rid }).to_string()
}

fn decode_position(token: &str) -> QueryResult<(Vec<Value>, String)> {
    let malformed = || QueryError::Backend {
        status_code: 400,
        sub_status: 0,
        message: format!("invalid backend continuation '{}'", token),
    };
    let value: Value = serde_json::from_str(token).map_err(|_| malformed())?;
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(malformed)?;
    let rid = value
        .get("rid")
        .and_then(Value::as_str)
        .ok_or_else(malformed)?
        .to_string();
    Ok((items, rid))
}

#[derive(Debug, Default)]
struct ContainerState {
    partitions: Vec<PartitionKeyRange>,
    routing_snapshot: Vec<PartitionKeyRange>,
    documents: Vec<StoredDocument>,
    plans: HashMap<String, PartitionedQueryExecutionInfo>,
    faults: VecDeque<QueryError>,
    requests: Vec<PartitionQueryRequest>,
    plan_sources: Vec<PlanSource>,
    cache_refreshes: usize,
    next_range_id: u64,
    next_rid: u64,
}

/// In-memory partitioned container
pub struct InMemoryContainer {
    resource_id: String,
    partition_key_path: String,
    engine: Arc<dyn ServerQueryEngine>,
    bypass_query_parsing: bool,
    disable_optimistic_direct_execution: bool,
    distributed_gateway: bool,
    latency: Option<Duration>,
    state: Mutex<ContainerState>,
}

impl InMemoryContainer {
    /// A container whose key space is cut into `partition_count` equal ranges
    pub fn new(partition_key_path: impl Into<String>, partition_count: usize) -> Self {
        let count = partition_count.max(1) as u64;
        let partitions: Vec<PartitionKeyRange> = (0..count)
            .map(|i| {
                PartitionKeyRange::new(
                    i.to_string(),
                    boundary_text(MAX_BOUNDARY * i / count),
                    boundary_text(MAX_BOUNDARY * (i + 1) / count),
                )
            })
            .collect();

        let state = ContainerState {
            routing_snapshot: partitions.clone(),
            partitions,
            next_range_id: count,
            ..ContainerState::default()
        };
        Self {
            resource_id: Uuid::new_v4().simple().to_string(),
            partition_key_path: partition_key_path.into(),
            engine: Arc::new(ScanEngine::new()),
            bypass_query_parsing: false,
            disable_optimistic_direct_execution: false,
            distributed_gateway: false,
            latency: None,
            state: Mutex::new(state),
        }
    }

    pub fn with_engine(mut self, engine: impl ServerQueryEngine + 'static) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn with_bypass_query_parsing(mut self, bypass: bool) -> Self {
        self.bypass_query_parsing = bypass;
        self
    }

    pub fn with_optimistic_direct_execution_disabled(mut self, disabled: bool) -> Self {
        self.disable_optimistic_direct_execution = disabled;
        self
    }

    pub fn with_distributed_gateway(mut self, enabled: bool) -> Self {
        self.distributed_gateway = enabled;
        self
    }

    /// Delay every page request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Store a document; it must carry the partition key
    pub fn insert(&self, document: Value) -> QueryResult<String> {
        let key = PartitionKey::from_document(&document, &self.partition_key_path).ok_or_else(|| {
            QueryError::InvalidOperation(format!(
                "document has no partition key at '{}'",
                self.partition_key_path
            ))
        })?;
        let mut state = self.state.lock();
        let rid = format!("{:016X}", state.next_rid);
        state.next_rid += 1;
        state.documents.push(StoredDocument {
            rid: rid.clone(),
            effective_partition_key: key.effective_partition_key(),
            body: document,
        });
        Ok(rid)
    }

    pub fn insert_all(&self, documents: impl IntoIterator<Item = Value>) -> QueryResult<usize> {
        let mut inserted = 0;
        for document in documents {
            self.insert(document)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Plan returned for `query`; unregistered queries get a passthrough plan
    pub fn register_plan(&self, query: impl Into<String>, plan: PartitionedQueryExecutionInfo) {
        self.state.lock().plans.insert(query.into(), plan);
    }

    /// Live partitions, sorted by min key
    pub fn partitions(&self) -> Vec<PartitionKeyRange> {
        self.state.lock().partitions.clone()
    }

    /// Split a partition at the middle of its range; returns the child ids
    pub fn split(&self, range_id: &str) -> QueryResult<(String, String)> {
        let mut state = self.state.lock();
        let index = state
            .partitions
            .iter()
            .position(|partition| partition.id == range_id)
            .ok_or_else(|| QueryError::InvalidOperation(format!("no partition '{}'", range_id)))?;
        let parent = state.partitions[index].clone();
        let low = boundary_value(&parent.min_inclusive)?;
        let high = boundary_value(&parent.max_exclusive)?;
        let middle = low + (high - low) / 2;
        if middle == low {
            return Err(QueryError::InvalidOperation(format!(
                "partition '{}' is too small to split",
                range_id
            )));
        }

        let left_id = state.next_range_id.to_string();
        let right_id = (state.next_range_id + 1).to_string();
        state.next_range_id += 2;
        let mut left = PartitionKeyRange::new(
            left_id.clone(),
            parent.min_inclusive.clone(),
            boundary_text(middle),
        );
        left.parents = vec![parent.id.clone()];
        let mut right = PartitionKeyRange::new(
            right_id.clone(),
            boundary_text(middle),
            parent.max_exclusive.clone(),
        );
        right.parents = vec![parent.id.clone()];

        state.partitions.splice(index..=index, [left, right]);
        log::debug!("Partition {} split into {} and {}", range_id, left_id, right_id);
        Ok((left_id, right_id))
    }

    /// Merge two adjacent partitions; returns the new id
    pub fn merge(&self, left_id: &str, right_id: &str) -> QueryResult<String> {
        let mut state = self.state.lock();
        let left_index = state
            .partitions
            .iter()
            .position(|partition| partition.id == left_id)
            .ok_or_else(|| QueryError::InvalidOperation(format!("no partition '{}'", left_id)))?;
        let right_index = left_index + 1;
        let adjacent = state
            .partitions
            .get(right_index)
            .map(|right| right.id == right_id)
            .unwrap_or(false);
        if !adjacent {
            return Err(QueryError::InvalidOperation(format!(
                "partitions '{}' and '{}' are not adjacent",
                left_id, right_id
            )));
        }

        let id = state.next_range_id.to_string();
        state.next_range_id += 1;
        let left = state.partitions[left_index].clone();
        let right = state.partitions[right_index].clone();
        let mut merged = PartitionKeyRange::new(id.clone(), left.min_inclusive, right.max_exclusive);
        merged.parents = vec![left.id, right.id];
        state.partitions.splice(left_index..=right_index, [merged]);
        Ok(id)
    }

    /// Make the routing map handed to clients current
    pub fn refresh_routing_map(&self) {
        let mut state = self.state.lock();
        state.routing_snapshot = state.partitions.clone();
    }

    /// Fail the next page request with `error`
    pub fn inject_fault(&self, error: QueryError) {
        self.state.lock().faults.push_back(error);
    }

    /// Page requests served so far, in arrival order
    pub fn requests(&self) -> Vec<PartitionQueryRequest> {
        self.state.lock().requests.clone()
    }

    pub fn cache_refreshes(&self) -> usize {
        self.state.lock().cache_refreshes
    }

    /// Where each plan request was routed
    pub fn plan_requests(&self) -> Vec<PlanSource> {
        self.state.lock().plan_sources.clone()
    }

    fn documents_in(&self, range: &Range, partition_key: Option<&PartitionKey>) -> Vec<StoredDocument> {
        let epk = partition_key.map(PartitionKey::effective_partition_key);
        self.state
            .lock()
            .documents
            .iter()
            .filter(|document| range.contains(&document.effective_partition_key))
            .filter(|document| match &epk {
                Some(epk) => &document.effective_partition_key == epk,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Sort, skip past `continuation` and cut one page
    fn paginate(
        result: ServerResult,
        continuation: Option<&str>,
        page_size: usize,
        unwrap_ordered: bool,
    ) -> QueryResult<BackendPage> {
        let ServerResult {
            mut rows,
            sort_orders,
        } = result;
        rows.sort_by(|a, b| {
            compare_order_by(&a.order_by_items, &a.rid, &b.order_by_items, &b.rid, &sort_orders)
        });
        if let Some(token) = continuation {
            let (items, rid) = decode_position(token)?;
            rows.retain(|row| {
                compare_order_by(&row.order_by_items, &row.rid, &items, &rid, &sort_orders).is_gt()
            });
        }

        let page_size = page_size.max(1);
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);
        let continuation = if has_more {
            rows.last().map(encode_position)
        } else {
            None
        };

        let ordered = !sort_orders.is_empty();
        let documents: Vec<Value> = rows
            .into_iter()
            .map(|row| {
                if ordered && !unwrap_ordered {
                    json!({ "_rid": row.rid, "orderByItems": row.order_by_items, "payload": row.value })
                } else {
                    row.value
                }
            })
            .collect();
        let response_length_bytes = serde_json::to_vec(&documents).map(|b| b.len()).unwrap_or(0);

        Ok(BackendPage {
            request_charge: 1.0 + documents.len() as f64 * 0.1,
            documents,
            continuation,
            activity_id: Some(Uuid::new_v4().to_string()),
            response_length_bytes,
            diagnostics: None,
        })
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl QueryClient for InMemoryContainer {
    async fn get_cached_container_properties(
        &self,
        _resource_link: &str,
        partition_key: Option<&PartitionKey>,
    ) -> QueryResult<ContainerQueryProperties> {
        Ok(ContainerQueryProperties {
            resource_id: self.resource_id.clone(),
            partition_key_paths: vec![self.partition_key_path.clone()],
            effective_partition_key_string: partition_key.map(PartitionKey::effective_partition_key),
        })
    }

    async fn get_target_partition_key_ranges(
        &self,
        _resource_link: &str,
        _collection_resource_id: &str,
        ranges: &[Range],
        force_refresh: bool,
    ) -> QueryResult<Vec<PartitionKeyRange>> {
        let mut state = self.state.lock();
        if force_refresh {
            state.routing_snapshot = state.partitions.clone();
        }
        Ok(state
            .routing_snapshot
            .iter()
            .filter(|partition| {
                let range = partition.to_range();
                ranges.iter().any(|target| range.overlaps(target))
            })
            .cloned()
            .collect())
    }

    async fn get_partition_key_range_by_id(
        &self,
        _resource_link: &str,
        _collection_resource_id: &str,
        partition_key_range_id: &str,
        force_refresh: bool,
    ) -> QueryResult<Option<PartitionKeyRange>> {
        let mut state = self.state.lock();
        if force_refresh {
            state.routing_snapshot = state.partitions.clone();
        }
        Ok(state
            .routing_snapshot
            .iter()
            .find(|partition| partition.id == partition_key_range_id)
            .cloned())
    }

    async fn force_refresh_collection_cache(&self, _resource_link: &str) -> QueryResult<()> {
        let mut state = self.state.lock();
        state.cache_refreshes += 1;
        state.routing_snapshot = state.partitions.clone();
        Ok(())
    }

    fn bypass_query_parsing(&self) -> bool {
        self.bypass_query_parsing
    }

    fn client_disable_optimistic_direct_execution(&self) -> bool {
        self.disable_optimistic_direct_execution
    }

    fn supports_distributed_gateway(&self) -> bool {
        self.distributed_gateway
    }
}

#[async_trait]
impl DocumentSource for InMemoryContainer {
    async fn query_page(&self, request: PartitionQueryRequest) -> QueryResult<BackendPage> {
        self.simulate_latency().await;
        {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            if let Some(fault) = state.faults.pop_front() {
                return Err(fault);
            }
            let served = state
                .partitions
                .iter()
                .any(|partition| partition.to_range().contains_range(&request.feed_range));
            if !served {
                return Err(QueryError::gone(
                    GoneSubStatus::PartitionKeyRangeGone,
                    format!("range {} is no longer served by one partition", request.feed_range),
                ));
            }
        }

        let documents = self.documents_in(&request.feed_range, request.partition_key.as_ref());
        let result = if request.whole_query {
            self.engine.execute_whole(&request.query, &documents)?
        } else {
            self.engine.execute(&request.query, &documents)?
        };
        Self::paginate(
            result,
            request.continuation.as_deref(),
            request.page_size,
            request.whole_query,
        )
    }

    async fn query_gateway(&self, request: GatewayQueryRequest) -> QueryResult<BackendPage> {
        if !self.distributed_gateway {
            return Err(QueryError::Unsupported("distributed gateway execution".to_string()));
        }
        self.simulate_latency().await;
        if let Some(fault) = self.state.lock().faults.pop_front() {
            return Err(fault);
        }
        let documents = self.documents_in(&Range::full(), request.partition_key.as_ref());
        let result = self.engine.execute_whole(&request.query, &documents)?;
        Self::paginate(result, request.continuation.as_deref(), request.page_size, true)
    }
}

#[async_trait]
impl QueryPlanRetriever for InMemoryContainer {
    async fn get_query_plan(
        &self,
        query: &SqlQuerySpec,
        _properties: &ContainerQueryProperties,
        _has_partition_key: bool,
        source: PlanSource,
    ) -> QueryResult<PartitionedQueryExecutionInfo> {
        let mut state = self.state.lock();
        state.plan_sources.push(source);
        Ok(state
            .plans
            .get(&query.query)
            .cloned()
            .unwrap_or_else(PartitionedQueryExecutionInfo::passthrough))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(partitions: usize) -> InMemoryContainer {
        let container = InMemoryContainer::new("/pk", partitions);
        for i in 0..40 {
            container.insert(json!({"id": i.to_string(), "pk": format!("key-{}", i)})).unwrap();
        }
        container
    }

    fn request(range: Range, continuation: Option<String>, page_size: usize) -> PartitionQueryRequest {
        PartitionQueryRequest {
            query: SqlQuerySpec::new("SELECT * FROM c"),
            feed_range: range,
            partition_key: None,
            continuation,
            page_size,
            whole_query: false,
        }
    }

    #[test]
    fn test_initial_partitions_cover_key_space() {
        let partitions = InMemoryContainer::new("/pk", 4).partitions();
        let ranges: Vec<Range> = partitions.iter().map(PartitionKeyRange::to_range).collect();
        assert!(crate::routing::covers_exactly(&Range::full(), &ranges));
        assert_eq!(partitions[1].min_inclusive, "3FC00000");
    }

    #[tokio::test]
    async fn test_paging_reads_every_document_once() {
        let container = container(1);
        let mut seen = Vec::new();
        let mut continuation = None;
        loop {
            let page = container
                .query_page(request(Range::full(), continuation.clone(), 7))
                .await
                .unwrap();
            seen.extend(page.documents);
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn test_split_parent_range_is_gone() {
        let container = container(2);
        let parent = container.partitions()[0].clone();
        container.split(&parent.id).unwrap();

        let error = container
            .query_page(request(parent.to_range(), None, 10))
            .await
            .unwrap_err();
        assert!(error.is_partition_split());

        // The routing snapshot still shows the parent until refreshed.
        let stale = container
            .get_target_partition_key_ranges("link", "rid", &[Range::full()], false)
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);
        let fresh = container
            .get_target_partition_key_ranges("link", "rid", &[Range::full()], true)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 3);
    }

    #[tokio::test]
    async fn test_merged_partition_serves_child_ranges() {
        let container = container(2);
        let ids: Vec<String> = container.partitions().iter().map(|p| p.id.clone()).collect();
        let child = container.partitions()[0].to_range();
        container.merge(&ids[0], &ids[1]).unwrap();

        assert_eq!(container.partitions().len(), 1);
        assert!(container.query_page(request(child, None, 100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_fault_is_returned_once() {
        let container = container(1);
        container.inject_fault(QueryError::throttled("busy"));

        assert!(container.query_page(request(Range::full(), None, 10)).await.is_err());
        assert!(container.query_page(request(Range::full(), None, 10)).await.is_ok());
    }
}
