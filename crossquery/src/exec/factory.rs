// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution strategy selection
//!
//! The pipeline handed to the caller is always
//! `CatchAll(NameCacheStaleRetry(Lazy(core)))`. The core is chosen on the
//! first advance, once container metadata and ranges can be resolved:
//!
//! 1. distributed gateway, when enabled and supported
//! 2. optimistic direct execution, when the query is pinned to one range
//! 3. passthrough fan-out, when per-range results can be concatenated
//! 4. the specialized pipeline otherwise

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::client::PlanSource;
use crate::error::{QueryError, QueryResult};
use crate::pipeline::{
    CatchAllStage, FanOutTarget, GatewayStage, LazyStage, NameCacheStaleRetryStage, OdeFallback,
    OptimisticDirectStage, PipelineStage, SpecializedPipelineFactory, SpecializedPipelineParams,
    StageBuilder, StageRebuilder,
};
use crate::plan::{ContainerQueryProperties, PartitionedQueryExecutionInfo};
use crate::routing::{PartitionRangeResolver, Range};
use crate::token::{PipelineContinuationToken, SourceToken};

use super::context::{PipelineKind, QueryContext};
use super::input::InputParameters;

/// Continuation split into the source token and the plan it carries
struct DecodedContinuation {
    source: Option<Value>,
    plan: Option<PartitionedQueryExecutionInfo>,
}

fn decode_continuation(input: &InputParameters) -> QueryResult<DecodedContinuation> {
    let Some(value) = &input.continuation else {
        return Ok(DecodedContinuation {
            source: None,
            plan: None,
        });
    };
    let latest = PipelineContinuationToken::decode(value)?.convert_to_latest()?;
    Ok(DecodedContinuation {
        source: Some(latest.source_continuation_token).filter(|source| !source.is_null()),
        plan: latest.query_plan,
    })
}

pub struct ExecutionContextFactory;

impl ExecutionContextFactory {
    /// Wrap the lazily selected core pipeline in the recovery stages
    pub fn create(input: InputParameters, context: Arc<QueryContext>) -> PipelineStage {
        let rebuild: StageRebuilder = {
            let context = context.clone();
            Arc::new(move |resume: Option<Value>| {
                let input = match resume {
                    Some(state) => input.with_continuation_token(Some(
                        PipelineContinuationToken::latest(state, context.cached_plan()).encode(),
                    )),
                    None => input.clone(),
                };
                let context = context.clone();
                let builder: StageBuilder = Arc::new(move |cancel: CancellationToken| {
                    let input = input.clone();
                    let context = context.clone();
                    async move { Self::create_core(input, context, cancel).await }.boxed()
                });
                LazyStage::new(builder).into_stage()
            })
        };

        let retry = NameCacheStaleRetryStage::new(
            rebuild,
            context.client.clone(),
            context.resource_link.clone(),
        );
        CatchAllStage::new(retry.into_stage()).into_stage()
    }

    async fn create_core(
        input: InputParameters,
        context: Arc<QueryContext>,
        cancel: CancellationToken,
    ) -> QueryResult<PipelineStage> {
        cancel.check()?;

        if input.enable_distributed_gateway && context.client.supports_distributed_gateway() {
            match Self::try_create_gateway(&input, &context) {
                Ok(stage) => {
                    context.record_pipeline(PipelineKind::DistributedGateway);
                    return Ok(stage);
                }
                Err(error) => {
                    log::debug!("Distributed gateway unavailable for this query: {}", error);
                }
            }
        }

        let continuation = decode_continuation(&input)?;
        let properties = context
            .client
            .get_cached_container_properties(&context.resource_link, input.partition_key.as_ref())
            .await?;
        let resolver = PartitionRangeResolver::new(
            context.client.clone(),
            context.resource_link.clone(),
            properties.resource_id.clone(),
        );

        let token = SourceToken::classify(continuation.source.as_ref());
        let ode_requested = input.enable_optimistic_direct_execution
            && !context.client.client_disable_optimistic_direct_execution()
            && input.partition_key.is_some();
        if token.is_single_range() || ode_requested {
            let ranges = resolver.resolve(&input.target_scope(), false).await?;
            if ranges.len() == 1 {
                match Self::try_create_ode(&input, &context, &resolver, &properties, &continuation, &ranges[0]) {
                    Ok(stage) => {
                        context.record_pipeline(PipelineKind::OptimisticDirectExecution);
                        return Ok(stage);
                    }
                    Err(error) if error.is_malformed_token() => {
                        log::info!(
                            "Continuation does not resume direct execution ({}), using the specialized pipeline",
                            error
                        );
                    }
                    Err(error) => return Err(error),
                }
            } else if token.is_single_range() {
                return Err(QueryError::PartitionTopologyChanged(format!(
                    "direct execution continuation targets one range, the query now spans {}",
                    ranges.len()
                )));
            }
        }

        Self::create_fan_out(
            input,
            context,
            resolver,
            properties,
            continuation.source,
            continuation.plan,
        )
        .await
    }

    fn try_create_gateway(
        input: &InputParameters,
        context: &QueryContext,
    ) -> QueryResult<PipelineStage> {
        let continuation = decode_continuation(input)?;
        GatewayStage::monadic_create(
            context.source.clone(),
            context.resource_link.clone(),
            input.query.clone(),
            input.partition_key.clone(),
            input.max_item_count,
            continuation.source.as_ref(),
        )
    }

    fn try_create_ode(
        input: &InputParameters,
        context: &Arc<QueryContext>,
        resolver: &PartitionRangeResolver,
        properties: &ContainerQueryProperties,
        continuation: &DecodedContinuation,
        range: &Range,
    ) -> QueryResult<PipelineStage> {
        let fallback: OdeFallback = {
            let input = input.clone();
            let context = context.clone();
            let resolver = resolver.clone();
            let properties = properties.clone();
            let plan = continuation.plan.clone();
            Arc::new(move |resume: Option<Value>| {
                let input = input.clone();
                let context = context.clone();
                let resolver = resolver.clone();
                let properties = properties.clone();
                let plan = plan.clone();
                async move {
                    Self::create_fan_out(input, context, resolver, properties, resume, plan).await
                }
                .boxed()
            })
        };

        OptimisticDirectStage::monadic_create(
            context.source.clone(),
            input.query.clone(),
            input.partition_key.clone(),
            range.clone(),
            input.max_item_count,
            continuation.source.as_ref(),
            fallback,
        )
    }

    async fn fetch_plan(
        input: &InputParameters,
        context: &QueryContext,
        properties: &ContainerQueryProperties,
        token_plan: Option<PartitionedQueryExecutionInfo>,
    ) -> QueryResult<PartitionedQueryExecutionInfo> {
        if input.force_passthrough {
            return Ok(PartitionedQueryExecutionInfo::passthrough());
        }
        if let Some(plan) = token_plan {
            log::debug!("Using the query plan cached in the continuation");
            return Ok(plan);
        }
        if let Some(plan) = &input.query_plan {
            return Ok(plan.clone());
        }

        let source = if context.client.bypass_query_parsing() {
            PlanSource::Gateway
        } else {
            PlanSource::Interop
        };
        context.note_plan_request();
        context
            .plan_retriever
            .get_query_plan(&input.query, properties, input.partition_key.is_some(), source)
            .await
    }

    /// Passthrough or specialized fan-out, depending on the plan
    async fn create_fan_out(
        input: InputParameters,
        context: Arc<QueryContext>,
        resolver: PartitionRangeResolver,
        properties: ContainerQueryProperties,
        source_token: Option<Value>,
        token_plan: Option<PartitionedQueryExecutionInfo>,
    ) -> QueryResult<PipelineStage> {
        let plan = Self::fetch_plan(&input, &context, &properties, token_plan).await?;
        context.record_plan(plan.clone());

        let scope = input.target_scope().with_query_ranges(plan.query_ranges.clone());
        let targets = resolver.resolve(&scope, false).await?;

        let info = &plan.query_info;
        let single_logical_partition = input.partition_key.is_some() || plan.targets_single_key();
        let passthrough = input.force_passthrough
            || info.is_client_streaming()
            || (single_logical_partition
                && targets.len() == 1
                && info.is_server_streaming()
                && !info.is_hybrid_search);

        let target = FanOutTarget {
            source: context.source.clone(),
            resolver,
            query: input.query.clone(),
            partition_key: input.partition_key.clone(),
            key_space: scope.key_space(),
        };
        let settings = input.fan_out_settings();

        if passthrough {
            let stage = SpecializedPipelineFactory::create_passthrough(
                target,
                settings,
                &targets,
                input.deterministic_ordering,
                source_token.as_ref(),
            )?;
            context.record_pipeline(PipelineKind::Passthrough);
            return Ok(stage);
        }

        let params = SpecializedPipelineParams {
            target,
            settings,
            targets,
            query_info: plan.query_info.clone(),
            deterministic: input.deterministic_ordering,
        };
        let stage = SpecializedPipelineFactory::create(params, source_token.as_ref())?;
        context.record_pipeline(PipelineKind::Specialized);
        Ok(stage)
    }
}
