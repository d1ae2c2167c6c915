// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query execution setup
//!
//! Resolves caller options into `InputParameters`, keeps per-query state in a
//! `QueryContext`, and selects the pipeline that runs the query.

pub mod context;
pub mod factory;
pub mod input;

pub use context::{PipelineKind, QueryContext};
pub use factory::ExecutionContextFactory;
pub use input::InputParameters;
