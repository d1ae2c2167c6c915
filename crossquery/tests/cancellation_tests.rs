//! Cancellation of in-flight and future reads

#[path = "testutils/mod.rs"]
mod testutils;

use std::time::{Duration, Instant};

use crossquery::{InMemoryContainer, QueryError, QueryRequestOptions};
use testutils::*;

#[tokio::test]
async fn test_cancelled_before_first_read() {
    let container = container(2, 10);
    let mut query = open(&container, "SELECT * FROM c", None, &QueryRequestOptions::default())
        .unwrap();

    query.cancellation_token().cancel();
    let result = query.read_next().await;

    assert!(matches!(result, Err(QueryError::Cancelled)));
    assert!(container.requests().is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_a_slow_backend() {
    init_logging();
    let container = seeded(
        InMemoryContainer::new("/pk", 4).with_latency(Duration::from_secs(5)),
        20,
    );
    let options = QueryRequestOptions::low_latency();
    let mut query = open(&container, "SELECT * FROM c", None, &options).unwrap();

    let cancel = query.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let result = query.read_next().await;

    assert!(matches!(result, Err(QueryError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_uncancelled_query_completes_with_latency() {
    let container = seeded(
        InMemoryContainer::new("/pk", 3).with_latency(Duration::from_millis(5)),
        15,
    );

    let documents = read_all(&container, "SELECT * FROM c", &QueryRequestOptions::low_latency())
        .await
        .unwrap();

    assert_eq!(documents.len(), 15);
}
