// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-range request scheduling shared by the fan-out stages
//!
//! A `FanOut` keeps one cursor per key range still to be read. Each cursor
//! holds at most one buffered backend page; requests for several cursors run
//! concurrently and stay in flight across advances of the owning stage.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};

use crate::cancel::CancellationToken;
use crate::client::{BackendPage, DocumentSource, PartitionQueryRequest};
use crate::error::{QueryError, QueryResult};
use crate::page::PageMetrics;
use crate::plan::SqlQuerySpec;
use crate::routing::{PartitionKey, PartitionRangeResolver, Range};
use crate::token::ParallelContinuationToken;

/// Consecutive split remaps of one range before the failure is surfaced
pub const MAX_SPLIT_RETRIES: u32 = 3;

/// Request shaping of a fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutSettings {
    pub page_size: usize,
    /// Page size of the first request of each range
    pub initial_page_size: Option<usize>,
    /// Concurrent requests; 0 runs one at a time
    pub max_concurrency: usize,
    pub max_buffered_item_count: usize,
}

impl Default for FanOutSettings {
    fn default() -> Self {
        Self {
            page_size: crate::config::DEFAULT_MAX_ITEM_COUNT,
            initial_page_size: None,
            max_concurrency: 0,
            max_buffered_item_count: crate::config::DEFAULT_MAX_BUFFERED_ITEM_COUNT,
        }
    }
}

/// Everything a fan-out needs to issue requests
#[derive(Clone)]
pub struct FanOutTarget {
    pub source: Arc<dyn DocumentSource>,
    pub resolver: PartitionRangeResolver,
    pub query: SqlQuerySpec,
    pub partition_key: Option<PartitionKey>,
    /// Keys the query reads; resumed ranges outside it need no target
    pub key_space: Vec<Range>,
}

/// A backend page waiting to be consumed
#[derive(Debug, Clone)]
pub struct BufferedPage {
    pub page: BackendPage,
    /// Backend continuation that produced this page
    pub start_token: Option<String>,
    /// Documents already consumed by a row-level reader
    pub consumed: usize,
}

impl BufferedPage {
    pub fn remaining(&self) -> &[serde_json::Value] {
        &self.page.documents[self.consumed.min(self.page.documents.len())..]
    }
}

#[derive(Debug)]
struct RangeCursor {
    id: u64,
    range: Range,
    next_token: Option<String>,
    started: bool,
    done: bool,
    fetching: bool,
    buffered: Option<BufferedPage>,
    split_attempts: u32,
}

impl RangeCursor {
    fn is_finished(&self) -> bool {
        self.done && !self.fetching && self.buffered.is_none()
    }

    /// Where a resumed query has to restart this range
    fn position(&self) -> Option<String> {
        match &self.buffered {
            Some(buffered) => buffered.start_token.clone(),
            None => self.next_token.clone(),
        }
    }
}

struct FetchOutcome {
    id: u64,
    start_token: Option<String>,
    result: QueryResult<BackendPage>,
}

pub struct FanOut {
    target: FanOutTarget,
    settings: FanOutSettings,
    cursors: Vec<RangeCursor>,
    in_flight: FuturesUnordered<BoxFuture<'static, FetchOutcome>>,
    arrivals: VecDeque<u64>,
    buffered_items: usize,
    metrics: PageMetrics,
    next_id: u64,
}

impl FanOut {
    /// Start reading every position, ordered by range
    pub fn new(
        target: FanOutTarget,
        settings: FanOutSettings,
        mut positions: Vec<ParallelContinuationToken>,
    ) -> Self {
        positions.sort_by(|a, b| a.range.min.cmp(&b.range.min));
        let mut fanout = Self {
            target,
            settings,
            cursors: Vec::with_capacity(positions.len()),
            in_flight: FuturesUnordered::new(),
            arrivals: VecDeque::new(),
            buffered_items: 0,
            metrics: PageMetrics::default(),
            next_id: 0,
        };
        for position in positions {
            let started = position.token.is_some();
            let cursor = fanout.cursor(position.range, position.token, started);
            fanout.cursors.push(cursor);
        }
        log::debug!("Fan-out over {} range(s)", fanout.cursors.len());
        fanout
    }

    fn cursor(&mut self, range: Range, token: Option<String>, started: bool) -> RangeCursor {
        self.next_id += 1;
        RangeCursor {
            id: self.next_id,
            range,
            next_token: token,
            started,
            done: false,
            fetching: false,
            buffered: None,
            split_attempts: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursors.iter().all(RangeCursor::is_finished)
    }

    /// Index of the unfinished range with the smallest min key
    pub fn first_active(&self) -> Option<usize> {
        self.cursors.iter().position(|cursor| !cursor.is_finished())
    }

    pub fn range_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.cursors
            .get(index)
            .map(|cursor| !cursor.is_finished())
            .unwrap_or(false)
    }

    pub fn buffered(&self, index: usize) -> Option<&BufferedPage> {
        self.cursors.get(index).and_then(|cursor| cursor.buffered.as_ref())
    }

    pub fn buffered_mut(&mut self, index: usize) -> Option<&mut BufferedPage> {
        self.cursors
            .get_mut(index)
            .and_then(|cursor| cursor.buffered.as_mut())
    }

    /// Remove and return the buffered page of a range
    pub fn take_buffered(&mut self, index: usize) -> Option<BufferedPage> {
        let cursor = self.cursors.get_mut(index)?;
        let buffered = cursor.buffered.take()?;
        let id = cursor.id;
        self.arrivals.retain(|arrived| *arrived != id);
        self.buffered_items = self
            .buffered_items
            .saturating_sub(buffered.page.documents.len());
        Some(buffered)
    }

    /// Index of the range whose buffered page arrived first
    pub fn next_arrival(&mut self) -> Option<usize> {
        while let Some(id) = self.arrivals.pop_front() {
            if let Some(index) = self
                .cursors
                .iter()
                .position(|cursor| cursor.id == id && cursor.buffered.is_some())
            {
                self.arrivals.push_front(id);
                return Some(index);
            }
        }
        None
    }

    /// Charges of every page that arrived since the last call
    pub fn take_metrics(&mut self) -> PageMetrics {
        self.metrics.take()
    }

    /// Positions of every unfinished range
    pub fn continuation(&self) -> Vec<ParallelContinuationToken> {
        self.cursors
            .iter()
            .filter(|cursor| !cursor.is_finished())
            .map(|cursor| ParallelContinuationToken::new(cursor.position(), cursor.range.clone()))
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Issue requests for ranges with nothing buffered
    ///
    /// The first unfinished range is always eligible. Other ranges wait while
    /// the buffer holds `max_buffered_item_count` items, unless `every_range`
    /// is set, for readers that need a page from every range to progress.
    pub fn fill(&mut self, every_range: bool) {
        let limit = self.settings.max_concurrency.max(1);
        let first_active = self.first_active();

        for index in 0..self.cursors.len() {
            if self.in_flight.len() >= limit {
                break;
            }
            let cursor = &self.cursors[index];
            if cursor.fetching || cursor.done || cursor.buffered.is_some() {
                continue;
            }
            if !every_range
                && Some(index) != first_active
                && self.buffered_items >= self.settings.max_buffered_item_count
            {
                continue;
            }
            self.launch(index);
        }
    }

    fn launch(&mut self, index: usize) {
        let cursor = &mut self.cursors[index];
        cursor.fetching = true;

        let page_size = match self.settings.initial_page_size {
            Some(initial) if !cursor.started => initial,
            _ => self.settings.page_size,
        };
        let start_token = cursor.next_token.clone();
        let request = PartitionQueryRequest {
            query: self.target.query.clone(),
            feed_range: cursor.range.clone(),
            partition_key: self.target.partition_key.clone(),
            continuation: start_token.clone(),
            page_size,
            whole_query: false,
        };
        let id = cursor.id;
        let source = self.target.source.clone();

        log::trace!("Requesting range {} from {:?}", cursor.range, start_token);
        self.in_flight.push(
            async move {
                let result = source.query_page(request).await;
                FetchOutcome {
                    id,
                    start_token,
                    result,
                }
            }
            .boxed(),
        );
    }

    /// Wait for one request to finish and apply its outcome
    ///
    /// Returns the failure to surface, if any. Splits are remapped here and
    /// only surface once a range failed `MAX_SPLIT_RETRIES` times in a row.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> QueryResult<Option<QueryError>> {
        if self.in_flight.is_empty() {
            return Ok(Some(QueryError::internal(
                "fan-out is waiting with no request in flight",
            )));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            outcome = self.in_flight.next() => outcome,
        };
        let Some(outcome) = outcome else {
            return Ok(None);
        };
        let Some(index) = self.cursors.iter().position(|c| c.id == outcome.id) else {
            return Ok(None);
        };
        self.cursors[index].fetching = false;

        match outcome.result {
            Ok(page) => {
                self.metrics.add_backend(&page);
                self.buffered_items += page.documents.len();
                let cursor = &mut self.cursors[index];
                cursor.started = true;
                cursor.split_attempts = 0;
                cursor.next_token = page.continuation.clone();
                cursor.done = page.continuation.is_none();
                cursor.buffered = Some(BufferedPage {
                    page,
                    start_token: outcome.start_token,
                    consumed: 0,
                });
                self.arrivals.push_back(outcome.id);
                Ok(None)
            }
            Err(error) if error.is_partition_split() => {
                self.remap_split(index, outcome.start_token, error, cancel)
                    .await
            }
            Err(QueryError::Cancelled) if cancel.is_cancelled() => Err(QueryError::Cancelled),
            Err(error) => {
                log::debug!(
                    "Request for range {} failed: {}",
                    self.cursors[index].range,
                    error
                );
                Ok(Some(error))
            }
        }
    }

    async fn remap_split(
        &mut self,
        index: usize,
        start_token: Option<String>,
        error: QueryError,
        cancel: &CancellationToken,
    ) -> QueryResult<Option<QueryError>> {
        let cursor = &mut self.cursors[index];
        cursor.split_attempts += 1;
        if cursor.split_attempts > MAX_SPLIT_RETRIES {
            log::warn!(
                "Range {} still reported gone after {} remaps",
                cursor.range,
                MAX_SPLIT_RETRIES
            );
            cursor.split_attempts = 0;
            return Ok(Some(error));
        }
        let parent = cursor.range.clone();

        let children = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            children = self.target.resolver.resolve_children(&parent, true) => children,
        };
        let children = match children {
            Ok(children) => children,
            Err(resolve_error) => return Ok(Some(resolve_error)),
        };
        if children.len() <= 1 {
            log::debug!("Range {} is gone but no split is visible yet", parent);
            return Ok(None);
        }

        log::info!(
            "Range {} split into {} ranges, resuming each from the parent position",
            parent,
            children.len()
        );
        let started = self.cursors[index].started;
        let replacements: Vec<RangeCursor> = children
            .into_iter()
            .map(|child| self.cursor(child, start_token.clone(), started))
            .collect();
        self.cursors.splice(index..=index, replacements);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_page_remaining() {
        let page = BufferedPage {
            page: BackendPage {
                documents: vec![serde_json::json!(1), serde_json::json!(2)],
                ..BackendPage::default()
            },
            start_token: None,
            consumed: 1,
        };
        assert_eq!(page.remaining(), &[serde_json::json!(2)]);
    }
}
