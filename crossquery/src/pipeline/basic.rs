// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Trivial stages

use crate::error::{QueryError, QueryResult};

use super::PageSlot;

/// A stage with nothing to return
#[derive(Debug, Default)]
pub struct EmptyStage {
    pub(crate) slot: PageSlot,
}

impl EmptyStage {
    pub fn move_next(&mut self) -> QueryResult<bool> {
        self.slot.ensure_live("Empty")?;
        Ok(self.slot.finish())
    }
}

/// A stage that fails once and then ends
#[derive(Debug)]
pub struct FaultedStage {
    error: Option<QueryError>,
    pub(crate) slot: PageSlot,
}

impl FaultedStage {
    pub fn new(error: QueryError) -> Self {
        Self {
            error: Some(error),
            slot: PageSlot::default(),
        }
    }

    pub fn move_next(&mut self) -> QueryResult<bool> {
        self.slot.ensure_live("Faulted")?;
        match self.error.take() {
            Some(error) => Ok(self.slot.set(Err(error))),
            None => Ok(self.slot.finish()),
        }
    }
}

/// Replays a fixed list of pages
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedStage {
    pages: std::collections::VecDeque<crate::page::PageResult>,
    pub(crate) slot: PageSlot,
}

#[cfg(test)]
impl ScriptedStage {
    pub fn stage(pages: Vec<crate::page::PageResult>) -> super::PipelineStage {
        super::PipelineStage::Scripted(Box::new(Self {
            pages: pages.into(),
            slot: PageSlot::default(),
        }))
    }

    pub fn move_next(&mut self) -> QueryResult<bool> {
        self.slot.ensure_live("Scripted")?;
        match self.pages.pop_front() {
            Some(page) => Ok(self.slot.set(page)),
            None => Ok(self.slot.finish()),
        }
    }
}
