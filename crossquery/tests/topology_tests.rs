//! Partition splits, merges and stale routing metadata
//!
//! The container changes shape between pages; every document must still be
//! returned exactly once.

#[path = "testutils/mod.rs"]
mod testutils;

use std::collections::HashSet;

use crossquery::{GoneSubStatus, PartitionKey, QueryError, QueryRequestOptions, SortOrder};
use crossquery::{InMemoryContainer, QueryInfo};
use serde_json::Value;
use testutils::*;

fn pages_of(size: i64) -> QueryRequestOptions {
    QueryRequestOptions::default().with_max_item_count(size)
}

fn assert_each_once(documents: &[Value], expected: usize) {
    let unique: HashSet<String> = ids(documents).into_iter().collect();
    assert_eq!(documents.len(), expected, "documents were lost or repeated");
    assert_eq!(unique.len(), expected);
}

fn stale() -> QueryError {
    QueryError::gone(GoneSubStatus::NameCacheIsStale, "name cache is stale")
}

#[tokio::test]
async fn test_split_between_pages_of_one_query() {
    init_logging();
    let container = container(2, 40);
    let mut query = open(&container, "SELECT * FROM c", None, &pages_of(5)).unwrap();

    let first = query.read_next().await.unwrap().unwrap();
    let parent = container.partitions()[0].id.clone();
    container.split(&parent).unwrap();
    let rest = query.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_each_once(&documents, 40);
    assert_eq!(container.partitions().len(), 3);
}

#[tokio::test]
async fn test_split_before_resuming_from_a_token() {
    let container = container(2, 40);
    let mut query = open(&container, "SELECT * FROM c", None, &pages_of(5)).unwrap();
    let first = query.read_next().await.unwrap().unwrap();
    let continuation = first.continuation.clone().unwrap();

    for partition in container.partitions() {
        container.split(&partition.id).unwrap();
    }
    let mut resumed = open(&container, "SELECT * FROM c", Some(&continuation), &pages_of(5)).unwrap();
    let rest = resumed.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_each_once(&documents, 40);
}

#[tokio::test]
async fn test_order_by_survives_a_split() {
    let query_text = "SELECT * FROM c ORDER BY c.rank";
    let info = QueryInfo {
        order_by: vec![SortOrder::Ascending],
        order_by_expressions: vec!["c.rank".into()],
        ..QueryInfo::default()
    };
    let container = planned_container(2, 40, query_text, info);
    let mut query = open(&container, query_text, None, &pages_of(4)).unwrap();

    let first = query.read_next().await.unwrap().unwrap();
    let parent = container.partitions()[1].id.clone();
    container.split(&parent).unwrap();
    let rest = query.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_eq!(field_u64(&documents, "rank"), (0..40).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_merge_before_resuming_from_a_token() {
    let container = container(3, 30);
    let mut query = open(&container, "SELECT * FROM c", None, &pages_of(4)).unwrap();
    let first = query.read_next().await.unwrap().unwrap();
    let continuation = first.continuation.clone().unwrap();

    let partitions = container.partitions();
    container.merge(&partitions[1].id, &partitions[2].id).unwrap();
    container.refresh_routing_map();

    let mut resumed = open(&container, "SELECT * FROM c", Some(&continuation), &pages_of(4)).unwrap();
    let rest = resumed.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_each_once(&documents, 30);
}

#[tokio::test]
async fn test_direct_execution_continues_after_its_range_splits() {
    let container = container(2, 40);
    let key = PartitionKey::from("key-3");
    let epk = key.effective_partition_key();
    let options = QueryRequestOptions::default()
        .with_partition_key(key)
        .with_max_item_count(1);

    let mut query = open(&container, "SELECT * FROM c", None, &options).unwrap();
    let first = query.read_next().await.unwrap().unwrap();

    let owner = container
        .partitions()
        .into_iter()
        .find(|partition| partition.to_range().contains(&epk))
        .unwrap();
    container.split(&owner.id).unwrap();
    let rest = query.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_eq!(
        ids(&documents),
        vec!["person-003", "person-013", "person-023", "person-033"]
    );
}

#[tokio::test]
async fn test_partition_key_token_resumes_on_the_child_holding_the_key() {
    let container = container(2, 40);
    let key = PartitionKey::from("key-3");
    let epk = key.effective_partition_key();
    let options = QueryRequestOptions {
        enable_optimistic_direct_execution: false,
        ..QueryRequestOptions::default()
    }
    .with_partition_key(key)
    .with_max_item_count(1);

    let mut query = open(&container, "SELECT * FROM c", None, &options).unwrap();
    let first = query.read_next().await.unwrap().unwrap();
    let continuation = first.continuation.clone().unwrap();

    let owner = container
        .partitions()
        .into_iter()
        .find(|partition| partition.to_range().contains(&epk))
        .unwrap();
    container.split(&owner.id).unwrap();
    container.refresh_routing_map();

    let mut resumed = open(&container, "SELECT * FROM c", Some(&continuation), &options).unwrap();
    let rest = resumed.read_all().await.unwrap();

    let mut documents = first.documents;
    documents.extend(rest);
    assert_eq!(
        ids(&documents),
        vec!["person-003", "person-013", "person-023", "person-033"]
    );
}

#[tokio::test]
async fn test_stale_name_cache_is_retried_once() {
    let container = container(1, 20);
    container.inject_fault(stale());

    let documents = read_all(&container, "SELECT * FROM c", &pages_of(50))
        .await
        .unwrap();

    assert_each_once(&documents, 20);
    assert_eq!(container.cache_refreshes(), 1);
}

#[tokio::test]
async fn test_second_stale_name_cache_is_surfaced() {
    let container = container(1, 20);
    container.inject_fault(stale());
    container.inject_fault(stale());

    let error = read_all(&container, "SELECT * FROM c", &pages_of(50))
        .await
        .unwrap_err();

    assert!(error.is_name_cache_stale());
    assert_eq!(container.cache_refreshes(), 1);
}

#[tokio::test]
async fn test_backend_failure_is_returned_as_error() {
    let container = seeded(InMemoryContainer::new("/pk", 2), 10);
    container.inject_fault(QueryError::throttled("request rate is large"));

    let mut query = open(&container, "SELECT * FROM c", None, &pages_of(50)).unwrap();
    let error = query.read_next().await.unwrap_err();

    assert!(error.is_transient());
    assert_eq!(container.cache_refreshes(), 0);
}
