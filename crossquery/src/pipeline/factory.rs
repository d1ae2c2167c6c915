// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Composition of the specialized pipeline
//!
//! Operator continuations nest: every operator wraps the state of the stage
//! below it in its own `sourceToken`. Creation therefore peels the token from
//! the outermost operator inwards, then builds the stages from the source
//! outwards, handing each one the state it peeled.

use serde_json::Value;

use crate::error::QueryResult;
use crate::plan::QueryInfo;
use crate::routing::Range;

use super::aggregate::AggregateStage;
use super::distinct::DistinctStage;
use super::fanout::{FanOutSettings, FanOutTarget};
use super::group_by::GroupByStage;
use super::order_by::OrderByStage;
use super::parallel::ParallelStage;
use super::skip::SkipStage;
use super::skip_empty_page::SkipEmptyPageStage;
use super::take::{TakeKind, TakeStage};
use super::PipelineStage;

/// Inputs of a specialized pipeline
#[derive(Clone)]
pub struct SpecializedPipelineParams {
    pub target: FanOutTarget,
    pub settings: FanOutSettings,
    pub targets: Vec<Range>,
    pub query_info: QueryInfo,
    pub deterministic: bool,
}

pub struct SpecializedPipelineFactory;

impl SpecializedPipelineFactory {
    /// Fan-out followed by the operators named in the plan
    pub fn create(
        params: SpecializedPipelineParams,
        continuation: Option<&Value>,
    ) -> QueryResult<PipelineStage> {
        let SpecializedPipelineParams {
            mut target,
            mut settings,
            targets,
            query_info: info,
            deterministic,
        } = params;
        if let Some(rewritten) = &info.rewritten_query {
            target.query.query = rewritten.clone();
        }

        let mut token = continuation.filter(|value| !value.is_null()).cloned();

        let top = match info.top {
            Some(count) => {
                let (remaining, inner) = TakeStage::peel(TakeKind::Top, count, token.as_ref())?;
                token = inner;
                Some(remaining)
            }
            None => None,
        };
        let limit = match info.limit {
            Some(count) => {
                let (remaining, inner) = TakeStage::peel(TakeKind::Limit, count, token.as_ref())?;
                token = inner;
                Some(remaining)
            }
            None => None,
        };
        let offset = match info.offset {
            Some(count) => {
                let (remaining, inner) = SkipStage::peel(count, token.as_ref())?;
                token = inner;
                Some(remaining)
            }
            None => None,
        };
        let group_by = if info.has_group_by() {
            let (state, inner) = GroupByStage::peel(token.as_ref())?;
            token = inner;
            Some(state)
        } else {
            None
        };
        let distinct = if info.has_distinct() {
            let (map, inner) = DistinctStage::peel(info.distinct_type, token.as_ref())?;
            token = inner;
            Some(map)
        } else {
            None
        };
        let aggregate = if info.has_aggregates() && !info.has_group_by() {
            let (state, inner) = AggregateStage::peel(token.as_ref())?;
            token = inner;
            Some(state)
        } else {
            None
        };

        let ordered = info.has_order_by() || info.is_hybrid_search;
        let mut stage = if ordered {
            if let Some(top) = info.top {
                settings.initial_page_size = Some(optimal_initial_page_size(top, targets.len()));
            }
            let sort_orders = if info.order_by.is_empty() {
                vec![crate::plan::SortOrder::Descending]
            } else {
                info.order_by.clone()
            };
            OrderByStage::monadic_create(target, settings.clone(), &targets, sort_orders, token.as_ref())?
        } else {
            ParallelStage::monadic_create(target, settings.clone(), &targets, deterministic, token.as_ref())?
        };

        if let Some(state) = aggregate {
            stage = AggregateStage::monadic_create(
                stage,
                &info.aggregates,
                &info.aggregate_aliases,
                info.has_select_value,
                state,
            )?;
        }
        if let Some(map) = distinct {
            stage = DistinctStage::monadic_create(stage, map)?;
        }
        if let Some(state) = group_by {
            stage = GroupByStage::monadic_create(
                stage,
                info.group_by_aliases.clone(),
                info.has_select_value,
                settings.page_size,
                state,
            )?;
        }
        if let Some(remaining) = offset {
            stage = SkipStage::monadic_create(stage, remaining)?;
        }
        if let Some(remaining) = limit {
            stage = TakeStage::monadic_create(stage, TakeKind::Limit, remaining)?;
        }
        if let Some(remaining) = top {
            stage = TakeStage::monadic_create(stage, TakeKind::Top, remaining)?;
        }

        Ok(SkipEmptyPageStage::new(stage).into_stage())
    }

    /// Plain concatenation of the per-range streams
    pub fn create_passthrough(
        target: FanOutTarget,
        settings: FanOutSettings,
        targets: &[Range],
        deterministic: bool,
        continuation: Option<&Value>,
    ) -> QueryResult<PipelineStage> {
        let stage =
            ParallelStage::monadic_create(target, settings, targets, deterministic, continuation)?;
        Ok(SkipEmptyPageStage::new(stage).into_stage())
    }
}

/// First page size per range of an ORDER BY ... TOP query
///
/// Sized so that the ranges together return a few times the TOP count, but
/// never more than TOP from one range.
pub fn optimal_initial_page_size(top: u64, range_count: usize) -> usize {
    let ranges = range_count.max(1) as u64;
    let per_range = (top.saturating_add(ranges - 1) / ranges).saturating_mul(5);
    usize::try_from(per_range.min(top).max(1)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimal_initial_page_size() {
        assert_eq!(optimal_initial_page_size(100, 10), 50);
        assert_eq!(optimal_initial_page_size(10, 1), 10);
        assert_eq!(optimal_initial_page_size(u64::MAX, 2) as u64, u64::MAX);
        assert_eq!(optimal_initial_page_size(3, 8), 3);
        assert_eq!(optimal_initial_page_size(0, 4), 1);
    }
}
