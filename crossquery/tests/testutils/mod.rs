//! Test utilities for crossquery integration tests
//!
//! Fixtures build an in-memory container, seed it with a fixed set of
//! documents and drive queries through the public API only.

#![allow(dead_code)]

use std::sync::Arc;

use crossquery::{
    CrossPartitionQuery, InMemoryContainer, PartitionedQueryExecutionInfo, QueryInfo,
    QueryRequestOptions, QueryResponse, QueryResult, QueryTarget, ScanEngine, SqlQuerySpec,
};
use serde_json::{json, Value};

pub const RESOURCE_LINK: &str = "dbs/test/colls/people";

pub const TEAMS: [&str; 3] = ["red", "blue", "green"];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `count` documents spread over ten logical partitions
///
/// Document `i` has `rank = i`, `age = 20 + i % 30` and team `TEAMS[i % 3]`.
pub fn people(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("person-{:03}", i),
                "pk": format!("key-{}", i % 10),
                "rank": i,
                "age": 20 + i % 30,
                "team": TEAMS[i % 3],
            })
        })
        .collect()
}

/// Seed `container` with `people(count)` and share it
pub fn seeded(container: InMemoryContainer, count: usize) -> Arc<InMemoryContainer> {
    container
        .insert_all(people(count))
        .expect("Failed to seed container");
    container.into_shared()
}

/// Plain container with `partitions` ranges and `count` people
pub fn container(partitions: usize, count: usize) -> Arc<InMemoryContainer> {
    seeded(InMemoryContainer::new("/pk", partitions), count)
}

/// Container whose backend evaluates `info`, with the plan registered for `query`
pub fn planned_container(
    partitions: usize,
    count: usize,
    query: &str,
    info: QueryInfo,
) -> Arc<InMemoryContainer> {
    let container =
        InMemoryContainer::new("/pk", partitions).with_engine(ScanEngine::for_plan(info.clone()));
    container.register_plan(
        query,
        PartitionedQueryExecutionInfo::passthrough().with_query_info(info),
    );
    seeded(container, count)
}

pub fn target(container: &Arc<InMemoryContainer>) -> QueryTarget {
    QueryTarget::new(
        container.clone(),
        container.clone(),
        container.clone(),
        RESOURCE_LINK,
    )
}

pub fn open(
    container: &Arc<InMemoryContainer>,
    query: &str,
    continuation: Option<&str>,
    options: &QueryRequestOptions,
) -> QueryResult<CrossPartitionQuery> {
    CrossPartitionQuery::new(
        target(container),
        SqlQuerySpec::new(query),
        continuation,
        options,
    )
}

/// Every document of the query in a single query object
pub async fn read_all(
    container: &Arc<InMemoryContainer>,
    query: &str,
    options: &QueryRequestOptions,
) -> QueryResult<Vec<Value>> {
    open(container, query, None, options)?.read_all().await
}

/// Every document of the query, opening a fresh query object for each page
pub async fn read_by_resuming(
    container: &Arc<InMemoryContainer>,
    query: &str,
    options: &QueryRequestOptions,
) -> QueryResult<(Vec<Value>, Vec<QueryResponse>)> {
    let mut documents = Vec::new();
    let mut responses = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let mut resumed = open(container, query, continuation.as_deref(), options)?;
        let Some(response) = resumed.read_next().await? else {
            break;
        };
        documents.extend(response.documents.iter().cloned());
        continuation = response.continuation.clone();
        responses.push(response);
        if continuation.is_none() {
            break;
        }
    }
    Ok((documents, responses))
}

/// Sorted ids of `documents`
pub fn ids(documents: &[Value]) -> Vec<String> {
    let mut ids: Vec<String> = documents
        .iter()
        .filter_map(|document| document.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    ids.sort();
    ids
}

pub fn field_u64(documents: &[Value], field: &str) -> Vec<u64> {
    documents
        .iter()
        .filter_map(|document| document.get(field).and_then(Value::as_u64))
        .collect()
}

/// Documents compared without regard to order
pub fn sorted(mut documents: Vec<Value>) -> Vec<Value> {
    documents.sort_by_key(|document| document.to_string());
    documents
}
