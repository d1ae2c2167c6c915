// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fan-out stage: concatenates per-range streams

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::error::QueryResult;
use crate::page::{QueryPage, QueryState};
use crate::routing::{remap_tokens, Range};
use crate::token::ParallelContinuationToken;

use super::fanout::{FanOut, FanOutSettings, FanOutTarget};
use super::{PageSlot, PipelineStage};

/// Emits backend pages of every target range unchanged
///
/// With deterministic ordering pages come out range by range in key order;
/// otherwise in the order they arrive. The continuation lists the position of
/// every range not yet finished.
pub struct ParallelStage {
    fanout: FanOut,
    deterministic: bool,
    pub(crate) slot: PageSlot,
}

impl ParallelStage {
    pub fn new(fanout: FanOut, deterministic: bool) -> Self {
        Self {
            fanout,
            deterministic,
            slot: PageSlot::default(),
        }
    }

    /// Build over `targets`, resuming from a parallel continuation when given
    pub fn monadic_create(
        target: FanOutTarget,
        settings: FanOutSettings,
        targets: &[Range],
        deterministic: bool,
        continuation: Option<&Value>,
    ) -> QueryResult<PipelineStage> {
        let positions = match continuation {
            None | Some(Value::Null) => targets
                .iter()
                .map(|range| ParallelContinuationToken::new(None, range.clone()))
                .collect(),
            Some(value) => {
                let tokens = ParallelContinuationToken::decode_all(value)?;
                remap_tokens(&tokens, targets, &target.key_space)?
            }
        };
        let fanout = FanOut::new(target, settings, positions);
        Ok(PipelineStage::Parallel(Box::new(Self::new(
            fanout,
            deterministic,
        ))))
    }

    fn state(&self) -> Option<QueryState> {
        let positions = self.fanout.continuation();
        if positions.is_empty() {
            None
        } else {
            Some(QueryState::new(ParallelContinuationToken::encode_all(
                &positions,
            )))
        }
    }

    fn ready_range(&mut self) -> Option<usize> {
        if self.deterministic {
            self.fanout
                .first_active()
                .filter(|index| self.fanout.buffered(*index).is_some())
        } else {
            self.fanout.next_arrival()
        }
    }

    pub async fn move_next(&mut self, cancel: &CancellationToken) -> QueryResult<bool> {
        self.slot.ensure_live("Parallel")?;

        loop {
            cancel.check()?;
            if self.fanout.is_finished() {
                return Ok(self.slot.finish());
            }

            self.fanout.fill(false);
            if let Some(index) = self.ready_range() {
                if let Some(buffered) = self.fanout.take_buffered(index) {
                    let mut page = QueryPage::new(buffered.page.documents, self.state());
                    page.diagnostics = buffered.page.diagnostics;
                    page.absorb_metrics(&self.fanout.take_metrics());
                    return Ok(self.slot.set(Ok(page)));
                }
            }

            if let Some(error) = self.fanout.wait(cancel).await? {
                return Ok(self.slot.set(Err(error)));
            }
        }
    }
}
