// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Hides intermediate empty pages from the caller

use crate::cancel::CancellationToken;
use crate::error::QueryResult;
use crate::page::{PageMetrics, QueryPage};

use super::{take_produced, PageSlot, PipelineStage};

/// Drops empty pages that still carry a continuation
///
/// Their request charge and byte length are carried into the next page
/// handed out. The final page is returned even when empty so the caller
/// always sees the end of the query. A source that ends right after skipped
/// pages gets an empty closing page holding their charges.
pub struct SkipEmptyPageStage {
    source: PipelineStage,
    source_done: bool,
    carried: PageMetrics,
    pub(crate) slot: PageSlot,
}

impl SkipEmptyPageStage {
    pub fn new(source: PipelineStage) -> Self {
        Self {
            source,
            source_done: false,
            carried: PageMetrics::default(),
            slot: PageSlot::default(),
        }
    }

    pub fn into_stage(self) -> PipelineStage {
        PipelineStage::SkipEmptyPage(Box::new(self))
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("SkipEmptyPage")?;

        loop {
            if self.source_done {
                return Ok(self.slot.finish());
            }
            if !self.source.move_next(cancel).await? {
                self.source_done = true;
                if self.carried.is_empty() {
                    return Ok(self.slot.finish());
                }
                let mut page = QueryPage::new(Vec::new(), None);
                page.absorb_metrics(&self.carried.take());
                return Ok(self.slot.set(Ok(page)));
            }

            match take_produced(&mut self.source) {
                Ok(page) if page.is_empty() && page.state.is_some() => {
                    self.carried.add_page(&page);
                    cancel.check()?;
                }
                Ok(mut page) => {
                    page.absorb_metrics(&self.carried.take());
                    return Ok(self.slot.set(Ok(page)));
                }
                Err(error) => return Ok(self.slot.set(Err(error))),
            }
        }
    }
}
