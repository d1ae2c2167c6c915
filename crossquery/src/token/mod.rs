// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Continuation token codec
//!
//! Pipeline tokens wrap a source token; source tokens position the stage
//! that talks to the backend. Operator stages add their own wrappers around
//! the source token and decode them in `crate::pipeline`.

pub mod pipeline;
pub mod source;

pub use pipeline::{
    parse_continuation, PipelineContinuationToken, PipelineContinuationTokenV1_1, TokenVersion,
};
pub use source::{
    DistributedGatewayToken, OptimisticDirectExecutionToken, OrderByContinuationToken,
    ParallelContinuationToken, SourceToken,
};
