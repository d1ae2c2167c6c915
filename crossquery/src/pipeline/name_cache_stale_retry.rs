// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! One-shot recovery from stale collection metadata

use std::sync::Arc;

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::client::QueryClient;
use crate::error::QueryResult;

use super::{take_produced, PageSlot, PipelineStage};

/// Rebuilds the wrapped pipeline, resuming from the last state handed out
/// (`None` restarts from the caller's original continuation)
pub type StageRebuilder = Arc<dyn Fn(Option<Value>) -> PipelineStage + Send + Sync>;

/// Refreshes the collection cache and rebuilds its source once when the
/// backend reports that cached collection metadata is stale
///
/// A second staleness signal is surfaced as a page failure.
pub struct NameCacheStaleRetryStage {
    source: PipelineStage,
    rebuild: StageRebuilder,
    client: Arc<dyn QueryClient>,
    resource_link: String,
    retried: bool,
    last_state: Option<Value>,
    pub(crate) slot: PageSlot,
}

impl NameCacheStaleRetryStage {
    pub fn new(
        rebuild: StageRebuilder,
        client: Arc<dyn QueryClient>,
        resource_link: impl Into<String>,
    ) -> Self {
        Self {
            source: rebuild(None),
            rebuild,
            client,
            resource_link: resource_link.into(),
            retried: false,
            last_state: None,
            slot: PageSlot::default(),
        }
    }

    pub fn into_stage(self) -> PipelineStage {
        PipelineStage::NameCacheStaleRetry(Box::new(self))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("NameCacheStaleRetry")?;

        loop {
            if !self.source.move_next(cancel).await? {
                return Ok(self.slot.finish());
            }

            match take_produced(&mut self.source) {
                Err(error) if error.is_name_cache_stale() && !self.retried => {
                    self.retried = true;
                    log::info!(
                        "Collection metadata for {} is stale, refreshing and rebuilding the pipeline",
                        self.resource_link
                    );
                    cancel.check()?;
                    if let Err(refresh_error) = self
                        .client
                        .force_refresh_collection_cache(&self.resource_link)
                        .await
                    {
                        return Ok(self.slot.set(Err(refresh_error)));
                    }
                    self.source = (self.rebuild)(self.last_state.clone());
                }
                Ok(page) => {
                    self.last_state = page.state.as_ref().map(|state| state.value().clone());
                    return Ok(self.slot.set(Ok(page)));
                }
                Err(error) => return Ok(self.slot.set(Err(error))),
            }
        }
    }
}
