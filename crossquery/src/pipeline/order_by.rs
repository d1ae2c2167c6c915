// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fan-out merge stage for ORDER BY queries
//!
//! Every range returns rows sorted by the query's ORDER BY; the stage merges
//! them. Backend rows have the shape
//! `{"_rid": ..., "orderByItems": [{"item": ...}, ...], "payload": ...}`
//! and only the payload is handed out.

use std::cmp::Ordering;

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::{QueryPage, QueryState};
use crate::plan::SortOrder;
use crate::routing::{remap_tokens, Range};
use crate::token::{OrderByContinuationToken, ParallelContinuationToken};

use super::fanout::{FanOut, FanOutSettings, FanOutTarget};
use super::ordering::compare_order_by;
use super::{PageSlot, PipelineStage};

/// Sort position of a row
#[derive(Debug, Clone, PartialEq)]
struct RowKey {
    items: Vec<Value>,
    rid: String,
}

fn row_key(row: &Value) -> QueryResult<RowKey> {
    let rid = row
        .get("_rid")
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::internal("order by row is missing _rid"))?;
    let items = row
        .get("orderByItems")
        .and_then(Value::as_array)
        .ok_or_else(|| QueryError::internal("order by row is missing orderByItems"))?;
    Ok(RowKey {
        items: items.clone(),
        rid: rid.to_string(),
    })
}

pub struct OrderByStage {
    fanout: FanOut,
    sort_orders: Vec<SortOrder>,
    page_size: usize,
    /// Rows at or before this key were returned before the query resumed
    resume_after: Option<RowKey>,
    last_emitted: Option<RowKey>,
    pub(crate) slot: PageSlot,
}

impl OrderByStage {
    pub fn monadic_create(
        target: FanOutTarget,
        settings: FanOutSettings,
        targets: &[Range],
        sort_orders: Vec<SortOrder>,
        continuation: Option<&Value>,
    ) -> QueryResult<PipelineStage> {
        let (positions, resume_after) = match continuation {
            None | Some(Value::Null) => (
                targets
                    .iter()
                    .map(|range| ParallelContinuationToken::new(None, range.clone()))
                    .collect(),
                None,
            ),
            Some(value) if value.is_array() => {
                let tokens = ParallelContinuationToken::decode_all(value)?;
                (remap_tokens(&tokens, targets, &target.key_space)?, None)
            }
            Some(value) => {
                let token = OrderByContinuationToken::decode(value)?;
                if token.resume_values.len() != sort_orders.len() {
                    return Err(QueryError::malformed_token(format!(
                        "order by continuation has {} resume values, query orders by {}",
                        token.resume_values.len(),
                        sort_orders.len()
                    )));
                }
                let positions = remap_tokens(&token.ranges, targets, &target.key_space)?;
                let resume = RowKey {
                    items: token.resume_values,
                    rid: token.rid,
                };
                (positions, Some(resume))
            }
        };

        let page_size = settings.page_size.max(1);
        Ok(PipelineStage::OrderBy(Box::new(Self {
            fanout: FanOut::new(target, settings, positions),
            sort_orders,
            page_size,
            resume_after,
            last_emitted: None,
            slot: PageSlot::default(),
        })))
    }

    fn compare(&self, left: &RowKey, right: &RowKey) -> Ordering {
        compare_order_by(
            &left.items,
            &left.rid,
            &right.items,
            &right.rid,
            &self.sort_orders,
        )
    }

    /// Skip rows already returned before a resume and release drained pages
    fn settle_heads(&mut self) -> QueryResult<()> {
        for index in 0..self.fanout.range_count() {
            loop {
                let Some(buffered) = self.fanout.buffered(index) else {
                    break;
                };
                let Some(head) = buffered.remaining().first() else {
                    self.fanout.take_buffered(index);
                    break;
                };
                let already_returned = match &self.resume_after {
                    Some(resume) => self.compare(&row_key(head)?, resume) != Ordering::Greater,
                    None => false,
                };
                if !already_returned {
                    break;
                }
                if let Some(buffered) = self.fanout.buffered_mut(index) {
                    buffered.consumed += 1;
                }
            }
        }
        Ok(())
    }

    /// Index of the active range whose head row sorts first
    fn smallest_head(&self) -> QueryResult<Option<(usize, RowKey)>> {
        let mut best: Option<(usize, RowKey)> = None;
        for index in 0..self.fanout.range_count() {
            let Some(head) = self
                .fanout
                .buffered(index)
                .and_then(|buffered| buffered.remaining().first())
            else {
                continue;
            };
            let key = row_key(head)?;
            let better = match &best {
                Some((_, current)) => self.compare(&key, current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((index, key));
            }
        }
        Ok(best)
    }

    fn state(&self) -> Option<QueryState> {
        if self.fanout.is_finished() {
            return None;
        }
        let last = self.last_emitted.as_ref().or(self.resume_after.as_ref());
        match last {
            Some(last) => Some(QueryState::new(
                OrderByContinuationToken {
                    resume_values: last.items.clone(),
                    rid: last.rid.clone(),
                    ranges: self.fanout.continuation(),
                }
                .to_value(),
            )),
            // Nothing returned yet: the plain positions are enough.
            None => Some(QueryState::new(ParallelContinuationToken::encode_all(
                &self.fanout.continuation(),
            ))),
        }
    }

    fn emit(&mut self, documents: Vec<Value>) -> QueryResult<bool> {
        self.settle_heads()?;
        let mut page = QueryPage::new(documents, self.state());
        page.absorb_metrics(&self.fanout.take_metrics());
        Ok(self.slot.set(Ok(page)))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("OrderBy")?;
        let mut documents = Vec::new();

        loop {
            cancel.check()?;
            if let Err(error) = self.settle_heads() {
                return Ok(self.slot.set(Err(error)));
            }
            if self.fanout.is_finished() {
                break;
            }

            let starving = (0..self.fanout.range_count())
                .any(|index| self.fanout.is_active(index) && self.fanout.buffered(index).is_none());
            if starving {
                self.fanout.fill(true);
                if let Some(error) = self.fanout.wait(cancel).await? {
                    if documents.is_empty() {
                        return Ok(self.slot.set(Err(error)));
                    }
                    // The failed range is retried on the next advance.
                    log::debug!("Returning a partial order by page after: {}", error);
                    return self.emit(documents);
                }
                continue;
            }

            let (index, key) = match self.smallest_head() {
                Ok(Some(head)) => head,
                Ok(None) => break,
                Err(error) => return Ok(self.slot.set(Err(error))),
            };
            if let Some(buffered) = self.fanout.buffered_mut(index) {
                if let Some(payload) = buffered.remaining().first().and_then(|row| row.get("payload")) {
                    documents.push(payload.clone());
                }
                buffered.consumed += 1;
            }
            self.last_emitted = Some(key);

            if documents.len() >= self.page_size {
                break;
            }
        }

        if documents.is_empty() && self.fanout.is_finished() {
            return Ok(self.slot.finish());
        }
        self.emit(documents)
    }
}
