// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Caller-facing query driver

pub mod query;

pub use query::{CrossPartitionQuery, QueryResponse, QueryTarget};
