// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory backend for tests, benchmarks and the CLI

pub mod container;
pub mod engine;

pub use container::InMemoryContainer;
pub use engine::{eval_path, ScanEngine, ServerQueryEngine, ServerResult, ServerRow, StoredDocument};
