// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pipeline stages
//!
//! Every stage is an async enumerator of pages. A stage is advanced with
//! `move_next`; a `true` result leaves the produced page (or the failure that
//! replaced it) in `current`. Data failures travel inside the page slot so
//! that wrappers can inspect and translate them; the `Err` of `move_next`
//! itself is reserved for cancellation and misuse.

pub mod aggregate;
pub mod basic;
pub mod catch_all;
pub mod distinct;
pub mod factory;
pub mod fanout;
pub mod gateway;
pub mod group_by;
pub mod lazy;
pub mod name_cache_stale_retry;
pub mod ode;
pub mod order_by;
pub mod ordering;
pub mod parallel;
pub mod skip;
pub mod skip_empty_page;
pub mod take;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::cancel::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::page::PageResult;

pub use aggregate::AggregateStage;
pub use basic::{EmptyStage, FaultedStage};
pub use catch_all::CatchAllStage;
pub use distinct::DistinctStage;
pub use factory::{SpecializedPipelineFactory, SpecializedPipelineParams};
pub use fanout::{FanOut, FanOutSettings, FanOutTarget};
pub use gateway::GatewayStage;
pub use group_by::GroupByStage;
pub use lazy::{AsyncLazy, LazyStage, StageBuilder};
pub use name_cache_stale_retry::{NameCacheStaleRetryStage, StageRebuilder};
pub use ode::{OdeFallback, OptimisticDirectStage};
pub use order_by::OrderByStage;
pub use parallel::ParallelStage;
pub use skip::SkipStage;
pub use skip_empty_page::SkipEmptyPageStage;
pub use take::{TakeKind, TakeStage};

/// Current page and lifecycle of a stage
#[derive(Debug, Default)]
pub struct PageSlot {
    current: Option<PageResult>,
    exhausted: bool,
}

impl PageSlot {
    /// Fail when the owning stage already reported exhaustion
    pub fn ensure_live(&self, stage: &str) -> QueryResult<()> {
        if self.exhausted {
            return Err(QueryError::invalid_operation(format!(
                "{} advanced after it was exhausted",
                stage
            )));
        }
        Ok(())
    }

    /// Store a produced page; returns `true` for use as the advance result
    pub fn set(&mut self, result: PageResult) -> bool {
        self.current = Some(result);
        true
    }

    /// Mark the stage exhausted; returns `false` for use as the advance result
    pub fn finish(&mut self) -> bool {
        self.current = None;
        self.exhausted = true;
        false
    }

    pub fn current(&self) -> Option<&PageResult> {
        self.current.as_ref()
    }

    pub fn take(&mut self) -> Option<PageResult> {
        self.current.take()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// A node of an execution pipeline
pub enum PipelineStage {
    Empty(EmptyStage),
    Faulted(FaultedStage),
    Lazy(Box<LazyStage>),
    CatchAll(Box<CatchAllStage>),
    SkipEmptyPage(Box<SkipEmptyPageStage>),
    NameCacheStaleRetry(Box<NameCacheStaleRetryStage>),
    Parallel(Box<ParallelStage>),
    OrderBy(Box<OrderByStage>),
    OptimisticDirect(Box<OptimisticDirectStage>),
    DistributedGateway(Box<GatewayStage>),
    Aggregate(Box<AggregateStage>),
    Distinct(Box<DistinctStage>),
    GroupBy(Box<GroupByStage>),
    Skip(Box<SkipStage>),
    Take(Box<TakeStage>),
    #[cfg(test)]
    Scripted(Box<basic::ScriptedStage>),
}

impl PipelineStage {
    pub fn empty() -> Self {
        PipelineStage::Empty(EmptyStage::default())
    }

    pub fn faulted(error: QueryError) -> Self {
        PipelineStage::Faulted(FaultedStage::new(error))
    }

    /// Advance to the next page
    ///
    /// `Ok(false)` means the stage is exhausted; advancing again afterwards
    /// fails with `QueryError::InvalidOperation`.
    pub fn move_next<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<bool>> {
        match self {
            PipelineStage::Empty(stage) => async move { stage.move_next() }.boxed(),
            PipelineStage::Faulted(stage) => async move { stage.move_next() }.boxed(),
            PipelineStage::Lazy(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::CatchAll(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::SkipEmptyPage(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::NameCacheStaleRetry(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::Parallel(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::OrderBy(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::OptimisticDirect(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::DistributedGateway(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::Aggregate(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::Distinct(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::GroupBy(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::Skip(stage) => stage.move_next(cancel).boxed(),
            PipelineStage::Take(stage) => stage.move_next(cancel).boxed(),
            #[cfg(test)]
            PipelineStage::Scripted(stage) => async move { stage.move_next() }.boxed(),
        }
    }

    fn slot(&self) -> &PageSlot {
        match self {
            PipelineStage::Empty(stage) => &stage.slot,
            PipelineStage::Faulted(stage) => &stage.slot,
            PipelineStage::Lazy(stage) => &stage.slot,
            PipelineStage::CatchAll(stage) => &stage.slot,
            PipelineStage::SkipEmptyPage(stage) => &stage.slot,
            PipelineStage::NameCacheStaleRetry(stage) => &stage.slot,
            PipelineStage::Parallel(stage) => &stage.slot,
            PipelineStage::OrderBy(stage) => &stage.slot,
            PipelineStage::OptimisticDirect(stage) => &stage.slot,
            PipelineStage::DistributedGateway(stage) => &stage.slot,
            PipelineStage::Aggregate(stage) => &stage.slot,
            PipelineStage::Distinct(stage) => &stage.slot,
            PipelineStage::GroupBy(stage) => &stage.slot,
            PipelineStage::Skip(stage) => &stage.slot,
            PipelineStage::Take(stage) => &stage.slot,
            #[cfg(test)]
            PipelineStage::Scripted(stage) => &stage.slot,
        }
    }

    fn slot_mut(&mut self) -> &mut PageSlot {
        match self {
            PipelineStage::Empty(stage) => &mut stage.slot,
            PipelineStage::Faulted(stage) => &mut stage.slot,
            PipelineStage::Lazy(stage) => &mut stage.slot,
            PipelineStage::CatchAll(stage) => &mut stage.slot,
            PipelineStage::SkipEmptyPage(stage) => &mut stage.slot,
            PipelineStage::NameCacheStaleRetry(stage) => &mut stage.slot,
            PipelineStage::Parallel(stage) => &mut stage.slot,
            PipelineStage::OrderBy(stage) => &mut stage.slot,
            PipelineStage::OptimisticDirect(stage) => &mut stage.slot,
            PipelineStage::DistributedGateway(stage) => &mut stage.slot,
            PipelineStage::Aggregate(stage) => &mut stage.slot,
            PipelineStage::Distinct(stage) => &mut stage.slot,
            PipelineStage::GroupBy(stage) => &mut stage.slot,
            PipelineStage::Skip(stage) => &mut stage.slot,
            PipelineStage::Take(stage) => &mut stage.slot,
            #[cfg(test)]
            PipelineStage::Scripted(stage) => &mut stage.slot,
        }
    }

    /// The page produced by the last successful advance
    pub fn current(&self) -> Option<&PageResult> {
        self.slot().current()
    }

    /// Move the current page out of the stage
    pub fn take_current(&mut self) -> Option<PageResult> {
        self.slot_mut().take()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Empty(_) => "Empty",
            PipelineStage::Faulted(_) => "Faulted",
            PipelineStage::Lazy(_) => "Lazy",
            PipelineStage::CatchAll(_) => "CatchAll",
            PipelineStage::SkipEmptyPage(_) => "SkipEmptyPage",
            PipelineStage::NameCacheStaleRetry(_) => "NameCacheStaleRetry",
            PipelineStage::Parallel(_) => "Parallel",
            PipelineStage::OrderBy(_) => "OrderBy",
            PipelineStage::OptimisticDirect(_) => "OptimisticDirect",
            PipelineStage::DistributedGateway(_) => "DistributedGateway",
            PipelineStage::Aggregate(_) => "Aggregate",
            PipelineStage::Distinct(_) => "Distinct",
            PipelineStage::GroupBy(_) => "GroupBy",
            PipelineStage::Skip(_) => "Skip",
            PipelineStage::Take(_) => "Take",
            #[cfg(test)]
            PipelineStage::Scripted(_) => "Scripted",
        }
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineStage").field(&self.name()).finish()
    }
}

/// Take the page an inner stage just produced
///
/// Stages always fill their slot before returning `true`; an empty slot is a
/// broken stage, reported as an internal failure page.
pub(crate) fn take_produced(stage: &mut PipelineStage) -> PageResult {
    stage.take_current().unwrap_or_else(|| {
        Err(QueryError::internal(format!(
            "{} stage advanced without producing a page",
            stage.name()
        )))
    })
}
