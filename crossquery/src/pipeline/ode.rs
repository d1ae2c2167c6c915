// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optimistic direct execution: the whole query runs on one range

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::client::{DocumentSource, PartitionQueryRequest};
use crate::error::{QueryError, QueryResult};
use crate::page::{QueryPage, QueryState};
use crate::plan::SqlQuerySpec;
use crate::routing::{PartitionKey, Range};
use crate::token::{OptimisticDirectExecutionToken, ParallelContinuationToken};

use super::{take_produced, PageSlot, PipelineStage};

/// Builds the replacement pipeline once the pinned range turns out to have
/// split; receives the equivalent fan-out continuation, `None` when nothing
/// was read yet
pub type OdeFallback =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, QueryResult<PipelineStage>> + Send + Sync>;

pub struct OptimisticDirectStage {
    source: Arc<dyn DocumentSource>,
    query: SqlQuerySpec,
    partition_key: Option<PartitionKey>,
    range: Range,
    page_size: usize,
    token: Option<String>,
    drained: bool,
    fallback: OdeFallback,
    replacement: Option<PipelineStage>,
    pub(crate) slot: PageSlot,
}

impl OptimisticDirectStage {
    /// Build over `range`, resuming from an ODE continuation when given
    ///
    /// Any other continuation shape is malformed for this stage.
    #[allow(clippy::too_many_arguments)]
    pub fn monadic_create(
        source: Arc<dyn DocumentSource>,
        query: SqlQuerySpec,
        partition_key: Option<PartitionKey>,
        range: Range,
        page_size: usize,
        continuation: Option<&Value>,
        fallback: OdeFallback,
    ) -> QueryResult<PipelineStage> {
        let (range, token) = match continuation {
            None | Some(Value::Null) => (range, None),
            Some(value) => {
                let decoded = OptimisticDirectExecutionToken::decode(value)?;
                (decoded.range, decoded.token)
            }
        };
        Ok(PipelineStage::OptimisticDirect(Box::new(Self {
            source,
            query,
            partition_key,
            range,
            page_size,
            token,
            drained: false,
            fallback,
            replacement: None,
            slot: PageSlot::default(),
        })))
    }

    fn fan_out_continuation(&self) -> Option<Value> {
        self.token.as_ref()?;
        let position = OptimisticDirectExecutionToken::new(self.token.clone(), self.range.clone())
            .into_parallel();
        Some(ParallelContinuationToken::encode_all(&[position]))
    }

    async fn advance_replacement(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        let Some(stage) = self.replacement.as_mut() else {
            return Err(QueryError::internal("no replacement pipeline"));
        };
        if stage.move_next(cancel).await? {
            let page = take_produced(stage);
            Ok(self.slot.set(page))
        } else {
            Ok(self.slot.finish())
        }
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("OptimisticDirect")?;
        if self.replacement.is_some() {
            return self.advance_replacement(cancel).await;
        }
        if self.drained {
            return Ok(self.slot.finish());
        }
        cancel.check()?;

        let request = PartitionQueryRequest {
            query: self.query.clone(),
            feed_range: self.range.clone(),
            partition_key: self.partition_key.clone(),
            continuation: self.token.clone(),
            page_size: self.page_size,
            whole_query: true,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = self.source.query_page(request) => result,
        };

        match result {
            Ok(page) => {
                self.token = page.continuation.clone();
                self.drained = self.token.is_none();
                let state = self.token.as_ref().map(|token| {
                    QueryState::new(
                        OptimisticDirectExecutionToken::new(Some(token.clone()), self.range.clone())
                            .to_value(),
                    )
                });
                Ok(self.slot.set(Ok(QueryPage::from_backend(page, state))))
            }
            Err(error) if error.is_partition_split() => {
                log::info!(
                    "Range {} targeted by direct execution split, continuing as a fan-out",
                    self.range
                );
                let continuation = self.fan_out_continuation();
                match (self.fallback)(continuation).await {
                    Ok(stage) => {
                        self.replacement = Some(stage);
                        self.advance_replacement(cancel).await
                    }
                    Err(fallback_error) => Ok(self.slot.set(Err(fallback_error))),
                }
            }
            Err(QueryError::Cancelled) if cancel.is_cancelled() => Err(QueryError::Cancelled),
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}
