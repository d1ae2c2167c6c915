// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Key ranges, partition keys and range resolution

pub mod partition_key;
pub mod range;
pub mod resolver;

pub use partition_key::{canonical_json, PartitionKey};
pub use range::{
    covers_exactly, sort_by_min, uncovered, FeedRange, PartitionKeyRange, Range, MAX_EXCLUSIVE,
    MIN_INCLUSIVE,
};
pub use resolver::{remap_tokens, PartitionRangeResolver, TargetScope};
