// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Distributed gateway stage: the gateway runs the whole query

use std::sync::Arc;

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::client::{DocumentSource, GatewayQueryRequest};
use crate::error::{QueryError, QueryResult};
use crate::page::{QueryPage, QueryState};
use crate::plan::SqlQuerySpec;
use crate::routing::PartitionKey;
use crate::token::DistributedGatewayToken;

use super::{PageSlot, PipelineStage};

pub struct GatewayStage {
    source: Arc<dyn DocumentSource>,
    resource_link: String,
    query: SqlQuerySpec,
    partition_key: Option<PartitionKey>,
    page_size: usize,
    token: Option<String>,
    drained: bool,
    pub(crate) slot: PageSlot,
}

impl GatewayStage {
    /// Fails when the continuation was not produced by this stage
    pub fn monadic_create(
        source: Arc<dyn DocumentSource>,
        resource_link: impl Into<String>,
        query: SqlQuerySpec,
        partition_key: Option<PartitionKey>,
        page_size: usize,
        continuation: Option<&Value>,
    ) -> QueryResult<PipelineStage> {
        let token = match continuation {
            None | Some(Value::Null) => None,
            Some(value) => Some(DistributedGatewayToken::decode(value)?.token),
        };
        Ok(PipelineStage::DistributedGateway(Box::new(Self {
            source,
            resource_link: resource_link.into(),
            query,
            partition_key,
            page_size,
            token,
            drained: false,
            slot: PageSlot::default(),
        })))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("DistributedGateway")?;
        if self.drained {
            return Ok(self.slot.finish());
        }
        cancel.check()?;

        let request = GatewayQueryRequest {
            resource_link: self.resource_link.clone(),
            query: self.query.clone(),
            partition_key: self.partition_key.clone(),
            continuation: self.token.clone(),
            page_size: self.page_size,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = self.source.query_gateway(request) => result,
        };

        match result {
            Ok(page) => {
                self.token = page.continuation.clone();
                self.drained = self.token.is_none();
                let state = self.token.as_ref().map(|token| {
                    QueryState::new(
                        DistributedGatewayToken {
                            token: token.clone(),
                        }
                        .to_value(),
                    )
                });
                Ok(self.slot.set(Ok(QueryPage::from_backend(page, state))))
            }
            Err(QueryError::Cancelled) if cancel.is_cancelled() => Err(QueryError::Cancelled),
            Err(error) => Ok(self.slot.set(Err(error))),
        }
    }
}
